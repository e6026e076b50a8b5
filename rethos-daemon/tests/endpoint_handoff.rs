//! Channel endpoint lifecycle: one client at a time, listener withdrawal and
//! restoration, length-prefixed client reads.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use rethos_core::Channel;
use rethos_daemon::{endpoint, mux, Event};
use tokio::io::AsyncWriteExt;

fn unique_namespace(tag: &str) -> String {
    static N: AtomicU32 = AtomicU32::new(0);
    format!(
        "rethos-test-{}-{tag}-{}",
        std::process::id(),
        N.fetch_add(1, Ordering::Relaxed)
    )
}

#[tokio::test]
async fn listener_is_withdrawn_while_a_client_is_attached() {
    let ns = unique_namespace("handoff");
    let (tx, mut rx) = mux::channel();
    endpoint::spawn(&ns, Channel(4), tx).unwrap();

    let client = endpoint::connect(&ns, Channel(4)).await.unwrap();
    match rx.recv().await.unwrap() {
        Event::ClientConnected { channel, .. } => assert_eq!(channel, Channel(4)),
        other => panic!("expected ClientConnected, got {other:?}"),
    }

    // The listener is gone: a second connect is refused immediately.
    assert!(endpoint::connect(&ns, Channel(4)).await.is_err());

    drop(client);
    match rx.recv().await.unwrap() {
        Event::ClientClosed { channel } => assert_eq!(channel, Channel(4)),
        other => panic!("expected ClientClosed, got {other:?}"),
    }

    // The endpoint rebinds right after reporting the disconnect; poll briefly.
    let mut reconnected = false;
    for _ in 0..100 {
        if endpoint::connect(&ns, Channel(4)).await.is_ok() {
            reconnected = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(reconnected, "listener was not restored after disconnect");
}

#[tokio::test]
async fn client_messages_are_reframed_into_events() {
    let ns = unique_namespace("messages");
    let (tx, mut rx) = mux::channel();
    endpoint::spawn(&ns, Channel(9), tx).unwrap();

    let mut client = endpoint::connect(&ns, Channel(9)).await.unwrap();
    match rx.recv().await.unwrap() {
        Event::ClientConnected { .. } => {}
        other => panic!("expected ClientConnected, got {other:?}"),
    }

    client.write_all(&5u32.to_be_bytes()).await.unwrap();
    client.write_all(b"hello").await.unwrap();
    match rx.recv().await.unwrap() {
        Event::ClientMessage { channel, payload } => {
            assert_eq!(channel, Channel(9));
            assert_eq!(&payload[..], b"hello");
        }
        other => panic!("expected ClientMessage, got {other:?}"),
    }

    // A length prefix split across writes still yields one message.
    client.write_all(&3u32.to_be_bytes()[..2]).await.unwrap();
    client.flush().await.unwrap();
    client.write_all(&3u32.to_be_bytes()[2..]).await.unwrap();
    client.write_all(b"abc").await.unwrap();
    match rx.recv().await.unwrap() {
        Event::ClientMessage { payload, .. } => assert_eq!(&payload[..], b"abc"),
        other => panic!("expected ClientMessage, got {other:?}"),
    }
}

#[tokio::test]
async fn truncated_message_closes_the_client() {
    let ns = unique_namespace("truncated");
    let (tx, mut rx) = mux::channel();
    endpoint::spawn(&ns, Channel(6), tx).unwrap();

    let mut client = endpoint::connect(&ns, Channel(6)).await.unwrap();
    match rx.recv().await.unwrap() {
        Event::ClientConnected { .. } => {}
        other => panic!("expected ClientConnected, got {other:?}"),
    }

    // Promise ten bytes, deliver three, hang up.
    client.write_all(&10u32.to_be_bytes()).await.unwrap();
    client.write_all(b"abc").await.unwrap();
    drop(client);

    match rx.recv().await.unwrap() {
        Event::ClientClosed { channel } => assert_eq!(channel, Channel(6)),
        other => panic!("expected ClientClosed, got {other:?}"),
    }
}
