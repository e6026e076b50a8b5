//! Per-channel local endpoints.
//!
//! Every channel gets an abstract-namespace stream socket named
//! `<namespace>/<channel>`. At most one client is served at a time: accepting
//! a client withdraws the listener, and a fresh listener is bound under the
//! same name once the client goes away. Client reads are framed with
//! [`MessageCodec`] and funneled into the multiplexer's event queue.

use std::io;
use std::os::linux::net::SocketAddrExt;
use std::os::unix::net::{
    SocketAddr, UnixListener as StdUnixListener, UnixStream as StdUnixStream,
};

use futures::StreamExt;
use rethos_core::{Channel, Result, NUM_CHANNELS};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{error, info, warn};

use crate::message::MessageCodec;
use crate::mux::Event;

fn abstract_name(namespace: &str, channel: Channel) -> String {
    format!("{namespace}/{channel}")
}

fn bind_listener(namespace: &str, channel: Channel) -> io::Result<UnixListener> {
    let addr = SocketAddr::from_abstract_name(abstract_name(namespace, channel).as_bytes())?;
    let listener = StdUnixListener::bind_addr(&addr)?;
    listener.set_nonblocking(true)?;
    UnixListener::from_std(listener)
}

/// Bind all 256 channel endpoints and spawn their acceptor tasks.
///
/// Binding happens eagerly so a name collision (say, a second daemon using
/// the same namespace) is a startup failure rather than a silent dead
/// channel.
pub fn spawn_all(namespace: &str, events: mpsc::Sender<Event>) -> Result<()> {
    for ch in 0..NUM_CHANNELS {
        spawn(namespace, Channel(ch as u8), events.clone())?;
    }
    Ok(())
}

/// Bind one channel endpoint and spawn its acceptor task.
pub fn spawn(namespace: &str, channel: Channel, events: mpsc::Sender<Event>) -> Result<()> {
    let listener = bind_listener(namespace, channel)?;
    let namespace = namespace.to_string();
    tokio::spawn(serve(namespace, channel, listener, events));
    Ok(())
}

/// Connect to a channel endpoint the way a client process would.
pub async fn connect(namespace: &str, channel: Channel) -> io::Result<UnixStream> {
    let addr = SocketAddr::from_abstract_name(abstract_name(namespace, channel).as_bytes())?;
    let stream = StdUnixStream::connect_addr(&addr)?;
    stream.set_nonblocking(true)?;
    UnixStream::from_std(stream)
}

async fn serve(
    namespace: String,
    channel: Channel,
    mut listener: UnixListener,
    events: mpsc::Sender<Event>,
) {
    loop {
        let stream = match listener.accept().await {
            Ok((stream, _)) => stream,
            Err(e) => {
                error!("accept on channel {channel} endpoint failed: {e}");
                continue;
            }
        };
        info!("accepted client process on channel {channel}");

        // Withdraw the listener: one entity listens and writes per channel.
        drop(listener);

        let (read_half, write_half) = stream.into_split();
        let writer = FramedWrite::new(write_half, MessageCodec::new());
        if events
            .send(Event::ClientConnected { channel, writer })
            .await
            .is_err()
        {
            return;
        }

        let mut messages = FramedRead::new(read_half, MessageCodec::new());
        while let Some(message) = messages.next().await {
            match message {
                Ok(payload) => {
                    let event = Event::ClientMessage {
                        channel,
                        payload: payload.freeze(),
                    };
                    if events.send(event).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    warn!("read from client on channel {channel} failed: {e}");
                    break;
                }
            }
        }
        info!("client process on channel {channel} disconnected");
        if events.send(Event::ClientClosed { channel }).await.is_err() {
            return;
        }

        listener = match bind_listener(&namespace, channel) {
            Ok(listener) => listener,
            Err(e) => {
                error!("could not rebind channel {channel} endpoint: {e}");
                return;
            }
        };
    }
}
