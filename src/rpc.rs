//! Running quic-rpc services and bidi calls.
//!
//! [DuplexSession::bidi] opens a bidi streaming call on an [RpcClient] and hands
//! both halves of the call to a [DuplexSession]. [run_server_loop] serves every
//! accepted channel on its own task.
use std::future::Future;

use futures_lite::Stream;
use quic_rpc::{
    pattern::bidi_streaming::{self, BidiStreamingMsg},
    server::{RpcChannel, RpcServerError},
    transport::ConnectionErrors,
    Connector, Listener, RpcClient, RpcServer, Service,
};

use crate::duplex::{DuplexHandle, DuplexSession};

/// The [DuplexHandle] of a bidi call started with [DuplexSession::bidi].
pub type BidiHandle<C> =
    DuplexHandle<<C as ConnectionErrors>::SendError, bidi_streaming::ItemError<C>>;

impl DuplexSession {
    /// Start the bidi call `msg` on `client` and drive it with this session.
    ///
    /// Every item of `updates` is sent to the server, after which the send side is
    /// closed and dropped. Every response is passed to `on_response`. The returned
    /// handle resolves once the server has finished its response stream.
    pub async fn bidi<S, C, M, U, F>(
        self,
        client: &RpcClient<S, C>,
        msg: M,
        updates: U,
        on_response: F,
    ) -> Result<BidiHandle<C>, bidi_streaming::Error<C>>
    where
        S: Service,
        C: Connector<S>,
        M: BidiStreamingMsg<S>,
        U: Stream<Item = M::Update> + Send + 'static,
        F: FnMut(M::Response) + Send + 'static,
    {
        let (send, recv) = client.bidi(msg).await?;
        Ok(self.spawn(send, recv, updates, on_response))
    }
}

/// Serve `server` until it can no longer accept channels.
///
/// `handler` is called with the first request of every channel, on a task of its
/// own, so a slow request does not hold up the others. Failed requests are logged
/// and do not end the loop. The loop ends with [RpcServerError::Accept], e.g. once
/// every client is gone.
pub async fn run_server_loop<S, C, T, F, Fut>(
    server: RpcServer<S, C>,
    target: T,
    handler: F,
) -> Result<(), RpcServerError<C>>
where
    S: Service,
    C: Listener<S>,
    T: Clone + Send + 'static,
    F: FnOnce(RpcChannel<S, C>, S::Req, T) -> Fut + Clone + Send + 'static,
    Fut: Future<Output = Result<(), RpcServerError<C>>> + Send + 'static,
{
    loop {
        let accepting = server.accept().await?;
        let target = target.clone();
        let handler = handler.clone();
        tokio::spawn(async move {
            let res = match accepting.read_first().await {
                Ok((req, chan)) => handler(chan, req, target).await,
                Err(cause) => Err(cause),
            };
            if let Err(cause) = res {
                tracing::warn!("request failed: {cause}");
            }
        });
    }
}
