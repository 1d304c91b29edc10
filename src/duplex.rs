//! Duplex sessions for bidirectional streams.
//!
//! A bidi call hands the client a send half and a receive half of one stream.
//! The usual way to drive it is two concurrent loops: one feeding requests into
//! the send half, one forwarding responses from the receive half. A
//! [DuplexSession] spawns both loops and returns a [DuplexHandle] whose
//! [join](DuplexHandle::join) resolves once both have stopped.
//!
//! The receive loop is authoritative. The remote usually ends its response stream
//! only after it has processed every request, so end-of-stream on the receive
//! half ends the session. If the receive loop stops before the send loop, the send
//! loop is stopped as well.
//!
//! # Example
//! ```
//! # async fn example() -> anyhow::Result<()> {
//! use duplex_rpc::DuplexSession;
//! use futures_lite::stream;
//! use std::convert::Infallible;
//!
//! // a sink that swallows requests and a stream of canned responses
//! let send = futures_util::sink::drain::<u64>();
//! let recv = stream::iter(vec![Ok::<_, Infallible>(10u64), Ok(20)]);
//! let handle = DuplexSession::new().spawn(
//!     send,
//!     recv,
//!     stream::iter(vec![1u64, 2, 3]),
//!     |res: u64| println!("received {res}"),
//! );
//! let summary = handle.join().await?;
//! assert_eq!(summary.received, 2);
//! # Ok(())
//! # }
//! ```
use std::{
    error,
    fmt::{self, Debug},
    panic, result,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use futures_lite::{Stream, StreamExt};
use futures_sink::Sink;
use futures_util::SinkExt;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// What to do with the receive loop when sending fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SendErrorPolicy {
    /// Stop the receive loop immediately.
    #[default]
    Abort,
    /// Keep forwarding responses until the remote ends its stream.
    ///
    /// The send half is dropped, so the remote sees that no more requests follow.
    Drain,
}

/// Configuration for a [DuplexSession].
#[derive(Debug, Clone, Default)]
pub struct DuplexConfig {
    /// Behaviour of the receive loop after a send failure.
    pub on_send_error: SendErrorPolicy,
}

/// Error for a duplex session.
///
/// If both loops fail, [SessionError::ReceiveFailed] wins.
#[derive(Debug)]
pub enum SessionError<SE, RE> {
    /// Sending a request or closing the send half failed
    SendFailed(SE),
    /// Receiving a response failed
    ReceiveFailed(RE),
    /// The session was cancelled before the remote ended its stream
    Cancelled,
}

impl<SE: Debug, RE: Debug> fmt::Display for SessionError<SE, RE> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl<SE: Debug, RE: Debug> error::Error for SessionError<SE, RE> {}

/// Outcome of a session that ended with end-of-stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    /// Number of requests sent
    pub sent: usize,
    /// Number of responses forwarded
    pub received: usize,
    /// False if the remote ended the stream before all requests were sent
    pub send_closed: bool,
}

/// State of a session as seen from its [DuplexHandle].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// At least one of the two loops is still running
    Open,
    /// Both loops have stopped
    Closed,
}

/// Builder for duplex sessions.
#[derive(Debug, Clone, Default)]
pub struct DuplexSession {
    config: DuplexConfig,
    cancel: CancellationToken,
}

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(0);

impl DuplexSession {
    /// A session with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// A session with the given configuration.
    pub fn with_config(config: DuplexConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Set the send error policy.
    pub fn on_send_error(mut self, policy: SendErrorPolicy) -> Self {
        self.config.on_send_error = policy;
        self
    }

    /// Tie the session to an external cancellation token.
    ///
    /// Cancelling `token` stops both loops and resolves the session with
    /// [SessionError::Cancelled]. Cancelling a single session through
    /// [DuplexHandle::cancel] does not cancel `token`.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Spawn the send and receive loops for one stream.
    ///
    /// `send` receives every item of `requests` in order, followed by a single
    /// close once `requests` is exhausted. Every response from `recv` is passed
    /// to `on_response` in order. `None` from `recv` is end-of-stream.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<Req, Res, SE, RE, Si, St, U, F>(
        self,
        send: Si,
        recv: St,
        requests: U,
        on_response: F,
    ) -> DuplexHandle<SE, RE>
    where
        Req: Send + 'static,
        Res: Send + 'static,
        SE: Debug + Send + 'static,
        RE: Debug + Send + 'static,
        Si: Sink<Req, Error = SE> + Send + 'static,
        St: Stream<Item = result::Result<Res, RE>> + Send + 'static,
        U: Stream<Item = Req> + Send + 'static,
        F: FnMut(Res) + Send + 'static,
    {
        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        let cancel = self.cancel.child_token();
        let stop_producer = cancel.child_token();
        let abort_consumer = cancel.child_token();
        let abort_on_error = match self.config.on_send_error {
            SendErrorPolicy::Abort => Some(abort_consumer.clone()),
            SendErrorPolicy::Drain => None,
        };
        let producer = {
            let stop = stop_producer.clone();
            let abort_on_panic = abort_consumer.clone().drop_guard();
            tokio::spawn(
                async move {
                    let exit = produce(send, requests, stop, abort_on_error).await;
                    abort_on_panic.disarm();
                    exit
                }
                .instrument(tracing::debug_span!("duplex_send", session = id)),
            )
        };
        let consumer = tokio::spawn(
            async move {
                // whatever the reason, including a panicking callback, nothing
                // more will be received
                let _stop_producer = stop_producer.drop_guard();
                consume(recv, on_response, abort_consumer).await
            }
            .instrument(tracing::debug_span!("duplex_recv", session = id)),
        );
        DuplexHandle {
            producer,
            consumer,
            cancel,
        }
    }
}

/// Join point for the two loops of a [DuplexSession].
///
/// [join](Self::join) consumes the handle, so a session resolves exactly once.
/// Dropping the handle detaches the loops; they keep running until the stream ends.
#[derive(Debug)]
pub struct DuplexHandle<SE, RE> {
    producer: JoinHandle<ProducerExit<SE>>,
    consumer: JoinHandle<ConsumerExit<RE>>,
    cancel: CancellationToken,
}

impl<SE, RE> DuplexHandle<SE, RE> {
    /// Cancel this session.
    ///
    /// Both loops stop at their next suspension point, and [join](Self::join)
    /// resolves with [SessionError::Cancelled] unless a loop already failed.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Current state of the session.
    pub fn state(&self) -> SessionState {
        if self.is_closed() {
            SessionState::Closed
        } else {
            SessionState::Open
        }
    }

    /// True once both loops have stopped.
    pub fn is_closed(&self) -> bool {
        self.producer.is_finished() && self.consumer.is_finished()
    }

    /// Wait for both loops to stop and return the outcome of the session.
    ///
    /// Both loops have stopped before this returns, so `on_response` is not
    /// called afterwards. A panic in either loop is resumed here, once the other
    /// loop has stopped as well.
    pub async fn join(self) -> result::Result<SessionSummary, SessionError<SE, RE>> {
        let consumer = self.consumer.await;
        if consumer.is_err() {
            self.cancel.cancel();
        }
        let producer = self.producer.await;
        let consumer = unwrap_join(consumer).unwrap_or(ConsumerExit::Stopped);
        let producer = unwrap_join(producer).unwrap_or(ProducerExit::Stopped { sent: 0 });
        let res = resolve(producer, consumer);
        match &res {
            Ok(summary) => tracing::debug!("session done {summary:?}"),
            Err(SessionError::Cancelled) => tracing::debug!("session cancelled"),
            Err(_) => tracing::debug!("session failed"),
        }
        res
    }

    /// Like [join](Self::join), but cancels the session if it has not ended
    /// within `timeout`.
    pub async fn join_timeout(
        self,
        timeout: Duration,
    ) -> result::Result<SessionSummary, SessionError<SE, RE>> {
        let cancel = self.cancel.clone();
        let join = self.join();
        tokio::pin!(join);
        match tokio::time::timeout(timeout, &mut join).await {
            Ok(res) => res,
            Err(_) => {
                tracing::debug!("session deadline of {timeout:?} exceeded");
                cancel.cancel();
                join.await
            }
        }
    }
}

#[derive(Debug)]
enum ProducerExit<E> {
    /// All requests sent and the send half closed
    Closed { sent: usize },
    /// Stopped from the outside before the source was exhausted
    Stopped { sent: usize },
    Failed { sent: usize, cause: E },
}

impl<E> ProducerExit<E> {
    fn sent(&self) -> usize {
        match self {
            Self::Closed { sent } | Self::Stopped { sent } | Self::Failed { sent, .. } => *sent,
        }
    }
}

#[derive(Debug)]
enum ConsumerExit<E> {
    EndOfStream { received: usize },
    Stopped,
    Failed { cause: E },
}

async fn produce<Req, SE, Si, U>(
    send: Si,
    requests: U,
    stop: CancellationToken,
    abort_on_error: Option<CancellationToken>,
) -> ProducerExit<SE>
where
    SE: Debug,
    Si: Sink<Req, Error = SE>,
    U: Stream<Item = Req>,
{
    tokio::pin!(send);
    tokio::pin!(requests);
    let mut sent = 0;
    let failed = |sent: usize, cause: SE| {
        tracing::warn!("send failed after {sent} requests: {cause:?}");
        if let Some(abort) = &abort_on_error {
            abort.cancel();
        }
        ProducerExit::Failed { sent, cause }
    };
    loop {
        let next = tokio::select! {
            biased;
            _ = stop.cancelled() => return ProducerExit::Stopped { sent },
            next = requests.next() => next,
        };
        let Some(request) = next else {
            break;
        };
        let res = tokio::select! {
            biased;
            _ = stop.cancelled() => return ProducerExit::Stopped { sent },
            res = send.send(request) => res,
        };
        if let Err(cause) = res {
            return failed(sent, cause);
        }
        sent += 1;
        tracing::trace!("sent request {sent}");
    }
    let res = tokio::select! {
        biased;
        _ = stop.cancelled() => return ProducerExit::Stopped { sent },
        res = send.close() => res,
    };
    match res {
        Ok(()) => {
            tracing::debug!("closed send side after {sent} requests");
            ProducerExit::Closed { sent }
        }
        Err(cause) => failed(sent, cause),
    }
}

async fn consume<Res, RE, St, F>(
    recv: St,
    mut on_response: F,
    abort: CancellationToken,
) -> ConsumerExit<RE>
where
    RE: Debug,
    St: Stream<Item = result::Result<Res, RE>>,
    F: FnMut(Res),
{
    tokio::pin!(recv);
    let mut received = 0;
    loop {
        let item = tokio::select! {
            biased;
            _ = abort.cancelled() => return ConsumerExit::Stopped,
            item = recv.next() => item,
        };
        match item {
            Some(Ok(response)) => {
                received += 1;
                tracing::trace!("received response {received}");
                on_response(response);
            }
            Some(Err(cause)) => {
                tracing::warn!("receive failed after {received} responses: {cause:?}");
                return ConsumerExit::Failed { cause };
            }
            None => {
                tracing::debug!("end of stream after {received} responses");
                return ConsumerExit::EndOfStream { received };
            }
        }
    }
}

/// `None` if the task was cancelled by runtime shutdown.
fn unwrap_join<T>(res: result::Result<T, JoinError>) -> Option<T> {
    match res {
        Ok(exit) => Some(exit),
        Err(cause) if cause.is_panic() => panic::resume_unwind(cause.into_panic()),
        Err(_) => None,
    }
}

fn resolve<SE, RE>(
    producer: ProducerExit<SE>,
    consumer: ConsumerExit<RE>,
) -> result::Result<SessionSummary, SessionError<SE, RE>> {
    match (consumer, producer) {
        (ConsumerExit::Failed { cause }, _) => Err(SessionError::ReceiveFailed(cause)),
        (_, ProducerExit::Failed { cause, .. }) => Err(SessionError::SendFailed(cause)),
        (ConsumerExit::Stopped, _) => Err(SessionError::Cancelled),
        (ConsumerExit::EndOfStream { received }, producer) => Ok(SessionSummary {
            sent: producer.sent(),
            received,
            send_closed: matches!(producer, ProducerExit::Closed { .. }),
        }),
    }
}
