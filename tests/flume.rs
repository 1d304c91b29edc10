#![cfg(feature = "flume-transport")]
use duplex_rpc::services::calculator::{
    self, CalculatorRequest, CalculatorResponse, CalculatorService, FindMaximum,
    FindMaximumResponse, FindMaximumUpdate, Sum, SumResponse,
};
use futures_lite::StreamExt;
use futures_util::SinkExt;
use quic_rpc::{
    transport::{flume, Connector},
    RpcClient, RpcServer,
};

mod util;
use util::check_termination;

#[tokio::test]
async fn flume_channel_raw_bidi() -> anyhow::Result<()> {
    tracing_subscriber::fmt::try_init().ok();
    let (server, client) = flume::channel(1);
    let server = RpcServer::<CalculatorService, _>::new(server);
    let server_handle = tokio::task::spawn(calculator::serve(server));
    let client = RpcClient::<CalculatorService, _>::new(client);

    let (mut send, mut recv) = client.bidi(FindMaximum).await?;
    for (n, max) in [(3, 3), (1, 3), (5, 5)] {
        send.send(FindMaximumUpdate(n)).await?;
        let res = recv.next().await.transpose()?;
        assert_eq!(res, Some(FindMaximumResponse(max)));
    }
    send.close().await?;
    // the server sees the end of the updates once the sink is dropped
    drop(send);
    assert!(recv.next().await.is_none());

    drop(client);
    check_termination(server_handle).await?;
    Ok(())
}

/// Misbehaving clients only affect their own channel.
#[tokio::test]
async fn flume_channel_bad_requests() -> anyhow::Result<()> {
    tracing_subscriber::fmt::try_init().ok();
    let (server, client) = flume::channel(1);
    let server = RpcServer::<CalculatorService, _>::new(server);
    let server_handle = tokio::task::spawn(calculator::serve(server));

    // an update as the first message
    let (mut send, mut recv) = client.open().await?;
    send.send(CalculatorRequest::FindMaximumUpdate(FindMaximumUpdate(1)))
        .await?;
    assert!(recv.next().await.is_none());

    // a channel that is closed before the first message
    let (send, recv) = client.open().await?;
    drop((send, recv));

    // a second request on a rpc channel
    let (mut send, mut recv) = client.open().await?;
    let sum = Sum {
        first_number: 1,
        second_number: 2,
    };
    send.send(CalculatorRequest::Sum(sum)).await?;
    send.send(CalculatorRequest::Sum(sum)).await?;
    // the server either answers before noticing the update, or gives up
    match recv.next().await.transpose()? {
        None | Some(CalculatorResponse::Sum(SumResponse(3))) => {}
        res => panic!("unexpected response {res:?}"),
    }

    let client = RpcClient::<CalculatorService, _>::new(client);
    let res = client.rpc(sum).await?;
    assert_eq!(res, SumResponse(3));

    drop(client);
    check_termination(server_handle).await?;
    Ok(())
}
