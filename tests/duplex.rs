use std::{
    error, fmt,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    task::{Context, Poll},
    time::Duration,
};

use async_stream::stream;
use duplex_rpc::duplex::{
    DuplexConfig, DuplexSession, SendErrorPolicy, SessionError, SessionState, SessionSummary,
};
use futures_lite::{stream, Stream, StreamExt};
use futures_sink::Sink;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    Send(u32),
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MockError(&'static str);

impl fmt::Display for MockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

impl error::Error for MockError {}

type Events = Arc<Mutex<Vec<Event>>>;

/// A sink that records all calls and echoes every item to a response stream.
///
/// Closing the sink ends the response stream.
struct EchoSink {
    events: Events,
    fail_at: Option<usize>,
    sent: usize,
    echo: Option<mpsc::UnboundedSender<Result<u32, MockError>>>,
}

impl Sink<u32> for EchoSink {
    type Error = MockError;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), MockError>> {
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, item: u32) -> Result<(), MockError> {
        let this = self.get_mut();
        if this.fail_at == Some(this.sent) {
            return Err(MockError("send failed"));
        }
        this.sent += 1;
        this.events.lock().unwrap().push(Event::Send(item));
        if let Some(echo) = &this.echo {
            echo.send(Ok(item)).ok();
        }
        Ok(())
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), MockError>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), MockError>> {
        let this = self.get_mut();
        this.events.lock().unwrap().push(Event::Close);
        this.echo = None;
        Poll::Ready(Ok(()))
    }
}

fn echo(
    fail_at: Option<usize>,
) -> (
    EchoSink,
    impl Stream<Item = Result<u32, MockError>> + Send + 'static,
    Events,
) {
    let events = Events::default();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let sink = EchoSink {
        events: events.clone(),
        fail_at,
        sent: 0,
        echo: Some(tx),
    };
    let responses = stream! {
        while let Some(item) = rx.recv().await {
            yield item;
        }
    };
    (sink, responses, events)
}

/// Sets its flag when dropped.
struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

fn collector() -> (Arc<Mutex<Vec<u32>>>, impl FnMut(u32) + Send + 'static) {
    let items = Arc::new(Mutex::new(Vec::new()));
    let sink = items.clone();
    (items, move |item| sink.lock().unwrap().push(item))
}

fn events(events: &Events) -> Vec<Event> {
    events.lock().unwrap().clone()
}

fn taken(items: &Arc<Mutex<Vec<u32>>>) -> Vec<u32> {
    items.lock().unwrap().clone()
}

#[tokio::test]
async fn all_requests_then_one_close() -> anyhow::Result<()> {
    tracing_subscriber::fmt::try_init().ok();
    let (send, recv, recorded) = echo(None);
    let (responses, on_response) = collector();
    let handle = DuplexSession::new().spawn(send, recv, stream::iter(0..5u32), on_response);
    let summary = handle.join().await?;
    assert_eq!(
        summary,
        SessionSummary {
            sent: 5,
            received: 5,
            send_closed: true
        }
    );
    let mut expected = (0..5).map(Event::Send).collect::<Vec<_>>();
    expected.push(Event::Close);
    assert_eq!(events(&recorded), expected);
    assert_eq!(taken(&responses), vec![0, 1, 2, 3, 4]);
    Ok(())
}

#[tokio::test]
async fn empty_input() -> anyhow::Result<()> {
    let (send, recv, recorded) = echo(None);
    let (responses, on_response) = collector();
    let handle = DuplexSession::new().spawn(send, recv, stream::empty::<u32>(), on_response);
    let summary = handle.join().await?;
    assert_eq!(summary.sent, 0);
    assert_eq!(summary.received, 0);
    assert!(summary.send_closed);
    assert_eq!(events(&recorded), vec![Event::Close]);
    assert!(taken(&responses).is_empty());
    Ok(())
}

#[tokio::test]
async fn send_failure_stops_sending() -> anyhow::Result<()> {
    let (send, recv, recorded) = echo(Some(2));
    let (_responses, on_response) = collector();
    let handle = DuplexSession::new().spawn(send, recv, stream::iter(0..10u32), on_response);
    match handle.join().await {
        Err(SessionError::SendFailed(MockError("send failed"))) => {}
        other => panic!("unexpected session result {other:?}"),
    }
    assert_eq!(events(&recorded), vec![Event::Send(0), Event::Send(1)]);
    Ok(())
}

#[tokio::test]
async fn drain_forwards_responses_after_send_failure() -> anyhow::Result<()> {
    let (send, recv, recorded) = echo(Some(2));
    let (responses, on_response) = collector();
    let config = DuplexConfig {
        on_send_error: SendErrorPolicy::Drain,
    };
    let handle =
        DuplexSession::with_config(config).spawn(send, recv, stream::iter(0..10u32), on_response);
    let res = handle.join().await;
    assert!(matches!(res, Err(SessionError::SendFailed(_))));
    assert_eq!(events(&recorded), vec![Event::Send(0), Event::Send(1)]);
    assert_eq!(taken(&responses), vec![0, 1]);
    Ok(())
}

#[tokio::test]
async fn receive_error_on_third_response() -> anyhow::Result<()> {
    let (send, _recv, _recorded) = echo(None);
    let recv = stream::iter(vec![
        Ok(1u32),
        Ok(2),
        Err(MockError("receive failed")),
        Ok(4),
    ]);
    let (responses, on_response) = collector();
    let handle = DuplexSession::new().spawn(send, recv, stream::pending::<u32>(), on_response);
    match handle.join().await {
        Err(SessionError::ReceiveFailed(MockError("receive failed"))) => {}
        other => panic!("unexpected session result {other:?}"),
    }
    assert_eq!(taken(&responses), vec![1, 2]);
    Ok(())
}

#[tokio::test]
async fn end_of_stream_stops_sending() -> anyhow::Result<()> {
    let (send, _recv, recorded) = echo(None);
    let recv = stream::iter(vec![Ok::<_, MockError>(7u32)]);
    let (responses, on_response) = collector();
    let handle = DuplexSession::new().spawn(send, recv, stream::pending::<u32>(), on_response);
    let summary = handle.join().await?;
    assert_eq!(
        summary,
        SessionSummary {
            sent: 0,
            received: 1,
            send_closed: false
        }
    );
    // the send side is dropped, not closed
    assert!(events(&recorded).is_empty());
    assert_eq!(taken(&responses), vec![7]);
    Ok(())
}

#[tokio::test]
async fn cancel() -> anyhow::Result<()> {
    let (send, recv, _recorded) = echo(None);
    let (_responses, on_response) = collector();
    let handle = DuplexSession::new().spawn(send, recv, stream::pending::<u32>(), on_response);
    assert_eq!(handle.state(), SessionState::Open);
    handle.cancel();
    while !handle.is_closed() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    assert_eq!(handle.state(), SessionState::Closed);
    assert!(matches!(handle.join().await, Err(SessionError::Cancelled)));
    Ok(())
}

#[tokio::test]
async fn external_cancellation() -> anyhow::Result<()> {
    let token = CancellationToken::new();
    let mut handles = Vec::new();
    for _ in 0..3 {
        let (send, recv, _recorded) = echo(None);
        let (_responses, on_response) = collector();
        let session = DuplexSession::new().with_cancellation(token.clone());
        handles.push(session.spawn(send, recv, stream::pending::<u32>(), on_response));
    }
    // cancelling one session leaves the others and the shared token alone
    handles[0].cancel();
    assert!(!token.is_cancelled());
    token.cancel();
    for handle in handles {
        assert!(matches!(handle.join().await, Err(SessionError::Cancelled)));
    }
    Ok(())
}

#[tokio::test]
async fn join_timeout() -> anyhow::Result<()> {
    let (send, recv, recorded) = echo(None);
    let (responses, on_response) = collector();
    // two requests, then nothing for a long time
    let requests = stream! {
        yield 1u32;
        yield 2;
        tokio::time::sleep(Duration::from_secs(3600)).await;
    };
    let handle = DuplexSession::new().spawn(send, recv, requests, on_response);
    let res = handle.join_timeout(Duration::from_millis(50)).await;
    assert!(matches!(res, Err(SessionError::Cancelled)));
    assert_eq!(events(&recorded), vec![Event::Send(1), Event::Send(2)]);
    assert_eq!(taken(&responses), vec![1, 2]);
    Ok(())
}

#[tokio::test]
#[should_panic(expected = "handler panicked")]
async fn panic_is_resumed_on_join() {
    let (send, recv, _recorded) = echo(None);
    let handle = DuplexSession::new().spawn(send, recv, stream::iter(0..3u32), |_: u32| {
        panic!("handler panicked")
    });
    handle.join().await.ok();
}

#[tokio::test]
async fn panicking_callback_releases_send_half() {
    let dropped = Arc::new(AtomicBool::new(false));
    let send = futures_util::sink::unfold(DropFlag(dropped.clone()), |flag, _: u32| async move {
        Ok::<_, MockError>(flag)
    });
    let recv = stream::iter(vec![Ok::<_, MockError>(1u32)]).chain(stream::pending());
    // the send loop would wait for requests forever
    let handle = DuplexSession::new().spawn(send, recv, stream::pending::<u32>(), |_: u32| {
        panic!("handler panicked")
    });
    let joined = tokio::time::timeout(Duration::from_secs(5), tokio::spawn(handle.join()))
        .await
        .expect("join returns");
    assert!(joined.is_err_and(|cause| cause.is_panic()));
    assert!(dropped.load(Ordering::SeqCst));
}

#[tokio::test]
async fn panicking_request_source_stops_receiving() {
    let (send, _recv, recorded) = echo(None);
    let requests = stream! {
        yield 1u32;
        panic!("source panicked");
    };
    // the remote never answers
    let recv = stream::pending::<Result<u32, MockError>>();
    let handle = DuplexSession::new().spawn(send, recv, requests, |_: u32| {});
    let joined = tokio::time::timeout(Duration::from_secs(5), tokio::spawn(handle.join()))
        .await
        .expect("join returns");
    assert!(joined.is_err_and(|cause| cause.is_panic()));
    assert_eq!(events(&recorded), vec![Event::Send(1)]);
}
