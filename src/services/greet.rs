//! Greet service
//!
//! Builds greetings from a [Greeting], using all four interaction patterns.
//! [GreetWithDeadline] is a slow rpc that the client can give up on.
use std::time::Duration;

use async_stream::stream;
use derive_more::{From, TryInto};
use futures_lite::{Stream, StreamExt};
use futures_util::SinkExt;
use serde::{Deserialize, Serialize};

use quic_rpc::{
    message::{
        BidiStreaming, BidiStreamingMsg, ClientStreaming, ClientStreamingMsg, Msg, RpcMsg,
        ServerStreaming, ServerStreamingMsg,
    },
    server::{RpcChannel, RpcServerError},
    Connector, Listener, RpcClient, RpcServer, Service,
};

use crate::{
    duplex::DuplexSession,
    rpc::{run_server_loop, BidiHandle},
};

use super::RpcStatus;

/// Who to greet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Greeting {
    /// used in all greetings
    pub first_name: String,
    /// never used, but nice to have
    pub last_name: String,
}

impl Greeting {
    /// Create a new greeting.
    pub fn new(first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        Self {
            first_name: first_name.into(),
            last_name: last_name.into(),
        }
    }
}

/// Greet once
#[derive(Debug, Serialize, Deserialize)]
pub struct Greet(pub Greeting);

/// Response to [Greet]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GreetResponse(pub String);

/// Greet a number of times, see [GreetConfig]
#[derive(Debug, Serialize, Deserialize)]
pub struct GreetManyTimes(pub Greeting);

/// One response to [GreetManyTimes]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GreetManyTimesResponse(pub String);

/// Greet everybody sent as an update with a single response
#[derive(Debug, Serialize, Deserialize)]
pub struct LongGreet;

/// Update for [LongGreet]
#[derive(Debug, Serialize, Deserialize)]
pub struct LongGreetUpdate(pub Greeting);

/// Response to [LongGreet]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LongGreetResponse(pub String);

/// Greet everybody sent as an update, one response per update
#[derive(Debug, Serialize, Deserialize)]
pub struct GreetEveryone;

/// Update for [GreetEveryone]
#[derive(Debug, Serialize, Deserialize)]
pub struct GreetEveryoneUpdate(pub Greeting);

/// One response to [GreetEveryone]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GreetEveryoneResponse(pub String);

/// Greet once, slowly
#[derive(Debug, Serialize, Deserialize)]
pub struct GreetWithDeadline(pub Greeting);

/// Response to [GreetWithDeadline]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GreetWithDeadlineResponse(pub String);

/// Request enum
#[allow(missing_docs)]
#[derive(Debug, Serialize, Deserialize, From, TryInto)]
pub enum GreetServiceRequest {
    Greet(Greet),
    GreetManyTimes(GreetManyTimes),
    LongGreet(LongGreet),
    LongGreetUpdate(LongGreetUpdate),
    GreetEveryone(GreetEveryone),
    GreetEveryoneUpdate(GreetEveryoneUpdate),
    GreetWithDeadline(GreetWithDeadline),
}

/// Response enum
#[allow(missing_docs)]
#[derive(Debug, Serialize, Deserialize, From, TryInto)]
pub enum GreetServiceResponse {
    Greet(GreetResponse),
    GreetManyTimes(GreetManyTimesResponse),
    LongGreet(LongGreetResponse),
    GreetEveryone(GreetEveryoneResponse),
    GreetWithDeadline(GreetWithDeadlineResponse),
}

/// Timing of the greet service
#[derive(Debug, Clone)]
pub struct GreetConfig {
    /// Number of responses to a [GreetManyTimes] request
    pub repetitions: usize,
    /// Pause after each [GreetManyTimes] response
    pub interval: Duration,
    /// Number of steps before a [GreetWithDeadline] request is answered
    pub deadline_steps: u32,
    /// Duration of a single [GreetWithDeadline] step
    pub step: Duration,
}

impl Default for GreetConfig {
    fn default() -> Self {
        Self {
            repetitions: 10,
            interval: Duration::from_secs(1),
            deadline_steps: 3,
            step: Duration::from_secs(1),
        }
    }
}

/// The greet service
#[derive(Debug, Clone, Default)]
pub struct GreetService {
    config: GreetConfig,
}

impl Service for GreetService {
    type Req = GreetServiceRequest;
    type Res = GreetServiceResponse;
}

impl RpcMsg<GreetService> for Greet {
    type Response = GreetResponse;
}

impl Msg<GreetService> for GreetManyTimes {
    type Pattern = ServerStreaming;
}

impl ServerStreamingMsg<GreetService> for GreetManyTimes {
    type Response = GreetManyTimesResponse;
}

impl Msg<GreetService> for LongGreet {
    type Pattern = ClientStreaming;
}

impl ClientStreamingMsg<GreetService> for LongGreet {
    type Update = LongGreetUpdate;
    type Response = LongGreetResponse;
}

impl Msg<GreetService> for GreetEveryone {
    type Pattern = BidiStreaming;
}

impl BidiStreamingMsg<GreetService> for GreetEveryone {
    type Update = GreetEveryoneUpdate;
    type Response = GreetEveryoneResponse;
}

impl RpcMsg<GreetService> for GreetWithDeadline {
    type Response = GreetWithDeadlineResponse;
}

impl GreetService {
    /// Create a greet service with the given timing.
    pub fn new(config: GreetConfig) -> Self {
        Self { config }
    }

    async fn greet(self, Greet(greeting): Greet) -> GreetResponse {
        GreetResponse(format!("Hello {}", greeting.first_name))
    }

    fn greet_many_times(
        self,
        GreetManyTimes(greeting): GreetManyTimes,
    ) -> impl Stream<Item = GreetManyTimesResponse> {
        let GreetConfig {
            repetitions,
            interval,
            ..
        } = self.config;
        stream! {
            for i in 0..repetitions {
                yield GreetManyTimesResponse(format!("Hello {} number {i}", greeting.first_name));
                tokio::time::sleep(interval).await;
            }
        }
    }

    async fn long_greet(
        self,
        _req: LongGreet,
        updates: impl Stream<Item = LongGreetUpdate>,
    ) -> LongGreetResponse {
        tokio::pin!(updates);
        let mut res = String::from("Hello ");
        while let Some(LongGreetUpdate(greeting)) = updates.next().await {
            res.push_str(&greeting.first_name);
            res.push_str("! ");
        }
        LongGreetResponse(res)
    }

    fn greet_everyone(
        self,
        _req: GreetEveryone,
        updates: impl Stream<Item = GreetEveryoneUpdate>,
    ) -> impl Stream<Item = GreetEveryoneResponse> {
        updates.map(|GreetEveryoneUpdate(greeting)| {
            GreetEveryoneResponse(format!("Hello {}!", greeting.first_name))
        })
    }

    async fn greet_with_deadline(
        self,
        GreetWithDeadline(greeting): GreetWithDeadline,
    ) -> GreetWithDeadlineResponse {
        // the call is dropped between steps if the client goes away
        for step in 0..self.config.deadline_steps {
            tracing::trace!("greet with deadline, step {step}");
            tokio::time::sleep(self.config.step).await;
        }
        GreetWithDeadlineResponse(format!("Hello {}", greeting.first_name))
    }
}

async fn dispatch<C: Listener<GreetService>>(
    chan: RpcChannel<GreetService, C>,
    req: GreetServiceRequest,
    service: GreetService,
) -> Result<(), RpcServerError<C>> {
    use GreetServiceRequest::*;
    match req {
        Greet(msg) => chan.rpc(msg, service, GreetService::greet).await,
        GreetManyTimes(msg) => {
            chan.server_streaming(msg, service, GreetService::greet_many_times)
                .await
        }
        LongGreet(msg) => {
            chan.client_streaming(msg, service, GreetService::long_greet)
                .await
        }
        GreetEveryone(msg) => {
            chan.bidi_streaming(msg, service, GreetService::greet_everyone)
                .await
        }
        GreetWithDeadline(msg) => {
            chan.rpc(msg, service, GreetService::greet_with_deadline)
                .await
        }
        LongGreetUpdate(_) | GreetEveryoneUpdate(_) => {
            Err(RpcServerError::UnexpectedStartMessage)
        }
    }
}

/// Serve greet requests until the listener fails.
pub async fn serve<C: Listener<GreetService>>(
    server: RpcServer<GreetService, C>,
    service: GreetService,
) -> Result<(), RpcServerError<C>> {
    run_server_loop(server, service, dispatch::<C>).await
}

/// Typed client for the [GreetService].
#[derive(Debug, Clone)]
pub struct GreetApi<C> {
    client: RpcClient<GreetService, C>,
}

impl<C: Connector<GreetService>> GreetApi<C> {
    /// Wrap a client.
    pub fn new(client: RpcClient<GreetService, C>) -> Self {
        Self { client }
    }

    /// `Hello <first_name>`
    pub async fn greet(&self, greeting: Greeting) -> anyhow::Result<String> {
        let GreetResponse(res) = self.client.rpc(Greet(greeting)).await?;
        Ok(res)
    }

    /// A stream of numbered greetings.
    pub async fn greet_many_times(
        &self,
        greeting: Greeting,
    ) -> anyhow::Result<impl Stream<Item = anyhow::Result<String>> + Send + 'static> {
        let greetings = self
            .client
            .server_streaming(GreetManyTimes(greeting))
            .await?;
        Ok(greetings.map(|item| -> anyhow::Result<String> { Ok(item?.0) }))
    }

    /// A single greeting for everybody in `greetings`.
    pub async fn long_greet(
        &self,
        greetings: impl IntoIterator<Item = Greeting>,
    ) -> anyhow::Result<String> {
        let (mut send, recv) = self.client.client_streaming(LongGreet).await?;
        for greeting in greetings {
            send.send(LongGreetUpdate(greeting))
                .await
                .map_err(Into::<anyhow::Error>::into)?;
        }
        send.close().await.map_err(Into::<anyhow::Error>::into)?;
        drop(send);
        let LongGreetResponse(res) = recv.await?;
        Ok(res)
    }

    /// Greet everybody in `greetings`, passing each greeting to `on_greeting`.
    pub async fn greet_everyone(
        &self,
        greetings: impl Stream<Item = Greeting> + Send + 'static,
        mut on_greeting: impl FnMut(String) + Send + 'static,
        session: DuplexSession,
    ) -> anyhow::Result<BidiHandle<C>> {
        let handle = session
            .bidi(
                &self.client,
                GreetEveryone,
                greetings.map(GreetEveryoneUpdate),
                move |GreetEveryoneResponse(res)| on_greeting(res),
            )
            .await?;
        Ok(handle)
    }

    /// `Hello <first_name>`, unless the server takes longer than `deadline`.
    ///
    /// An elapsed deadline is an [RpcStatus] with code
    /// [DeadlineExceeded](super::StatusCode::DeadlineExceeded). The call is
    /// abandoned, which cancels it on the server.
    pub async fn greet_with_deadline(
        &self,
        greeting: Greeting,
        deadline: Duration,
    ) -> anyhow::Result<String> {
        let call = self.client.rpc(GreetWithDeadline(greeting));
        match tokio::time::timeout(deadline, call).await {
            Ok(res) => Ok(res?.0),
            Err(_) => {
                tracing::debug!("greet with deadline timed out after {deadline:?}");
                let status =
                    RpcStatus::deadline_exceeded(format!("Deadline of {deadline:?} exceeded"));
                Err(status.into())
            }
        }
    }
}
