use super::*;
use tokio::net::TcpListener;
use tokio::time::{Duration, timeout};

/// Accept one socket, echo every text frame back with an `echo:` prefix, and
/// close after receiving `bye`. Reports every frame seen, including close.
async fn spawn_echo_server() -> (String, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (seen_tx, seen_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let Ok((tcp, _)) = listener.accept().await else { return };
        let Ok(mut ws) = tokio_tungstenite::accept_async(tcp).await else { return };
        while let Some(Ok(msg)) = ws.next().await {
            match msg {
                Message::Text(text) => {
                    let text = text.as_str().to_owned();
                    let _ = seen_tx.send(text.clone());
                    if text == "bye" {
                        let _ = ws.close(None).await;
                        break;
                    }
                    let _ = ws.send(Message::Text(format!("echo:{text}").into())).await;
                }
                Message::Close(_) => {
                    let _ = seen_tx.send("<close>".to_owned());
                    break;
                }
                _ => {}
            }
        }
    });

    (format!("ws://{addr}/ws/token-1"), seen_rx)
}

async fn next_event(link: &mut SocketLink) -> SocketEvent {
    timeout(Duration::from_secs(2), link.inbound.recv())
        .await
        .expect("socket event timed out")
        .expect("socket event channel closed")
}

#[test]
fn pair_connects_link_to_remote() {
    let (mut link, mut remote) = SocketLink::pair();
    assert!(link.send_text("out".to_owned()));
    assert_eq!(remote.sent.try_recv().expect("sent"), "out");

    remote.events.send(SocketEvent::Text("in".to_owned())).expect("deliver");
    assert_eq!(link.inbound.try_recv().expect("inbound"), SocketEvent::Text("in".to_owned()));

    drop(remote);
    assert!(!link.send_text("late".to_owned()));
}

#[tokio::test]
async fn tungstenite_connector_round_trips_text_in_order() {
    let (url, mut seen) = spawn_echo_server().await;
    let mut link = TungsteniteConnector.open(&url).await.expect("open");

    assert!(link.send_text("one".to_owned()));
    assert!(link.send_text("two".to_owned()));

    assert_eq!(next_event(&mut link).await, SocketEvent::Text("echo:one".to_owned()));
    assert_eq!(next_event(&mut link).await, SocketEvent::Text("echo:two".to_owned()));
    assert_eq!(seen.recv().await.as_deref(), Some("one"));
    assert_eq!(seen.recv().await.as_deref(), Some("two"));
}

#[tokio::test]
async fn server_close_reports_single_closed_event() {
    let (url, _seen) = spawn_echo_server().await;
    let mut link = TungsteniteConnector.open(&url).await.expect("open");

    assert!(link.send_text("bye".to_owned()));
    assert!(matches!(next_event(&mut link).await, SocketEvent::Closed { .. }));
    // Pump has exited; the channel ends without a second close.
    let rest = timeout(Duration::from_secs(2), link.inbound.recv()).await.expect("channel should end");
    assert_eq!(rest, None);
}

#[tokio::test]
async fn dropping_link_closes_socket() {
    let (url, mut seen) = spawn_echo_server().await;
    let link = TungsteniteConnector.open(&url).await.expect("open");
    drop(link);

    let frame = timeout(Duration::from_secs(2), seen.recv()).await.expect("server should see close");
    assert_eq!(frame.as_deref(), Some("<close>"));
}

#[tokio::test]
async fn connect_failure_is_reported() {
    // Bind then drop to get a port with nothing listening.
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let err = TungsteniteConnector.open(&format!("ws://{addr}/ws/t")).await.expect_err("nothing listening");
    assert!(matches!(err, SocketError::Connect(_)));
}
