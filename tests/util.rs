use std::time::Duration;

use duplex_rpc::services::{RpcStatus, StatusCode};
use quic_rpc::{server::RpcServerError, transport::ConnectionErrors};

/// Dropping all clients causes the server to terminate with an accept error.
#[allow(unused)]
pub async fn check_termination<C: ConnectionErrors>(
    server_handle: tokio::task::JoinHandle<Result<(), RpcServerError<C>>>,
) -> anyhow::Result<()> {
    match tokio::time::timeout(Duration::from_secs(5), server_handle).await?? {
        Err(RpcServerError::Accept(_)) => {}
        e => panic!("unexpected termination result {e:?}"),
    }
    Ok(())
}

/// The status code of an error returned by one of the service apis.
#[allow(unused)]
pub fn status_code(err: &anyhow::Error) -> Option<StatusCode> {
    err.downcast_ref::<RpcStatus>().map(|status| status.code)
}
