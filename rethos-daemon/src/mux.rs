//! The multiplexer event loop.
//!
//! One task owns the serial writer, the link state, and all counters. Every
//! other source (channel clients, stdin, the TUN device) funnels into a
//! single event queue, so frames hit the wire whole and in order. The three
//! periodic timers are first-class wait sources, polled ahead of I/O so a
//! due retransmission precedes any newly composed frame.

use std::net::Ipv6Addr;

use bytes::Bytes;
use futures::SinkExt;
use rethos_core::{types::cmd, Channel, Config, Error, Result, Stats, MTU};
use rethos_link::{DecodeEvent, Disposition, Frame, FrameDecoder, Link};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::unix::OwnedWriteHalf;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tokio_util::codec::FramedWrite;
use tracing::{debug, info, warn};

use crate::message::MessageCodec;
use crate::tun::TunDevice;

/// Write side of an attached channel client.
pub type ClientWriter = FramedWrite<OwnedWriteHalf, MessageCodec>;

/// Everything the event loop can be woken up for besides serial bytes.
#[derive(Debug)]
pub enum Event {
    /// A client attached to a channel endpoint.
    ClientConnected { channel: Channel, writer: ClientWriter },
    /// A complete length-prefixed message arrived from a client.
    ClientMessage { channel: Channel, payload: Bytes },
    /// The client went away; the endpoint listener is being restored.
    ClientClosed { channel: Channel },
    /// Bytes read from the daemon's stdin.
    Stdin(Bytes),
    /// Stdin reached EOF; no further [`Event::Stdin`] will arrive.
    StdinClosed,
    /// One IP packet read from the TUN device.
    TunPacket(Bytes),
}

/// Depth of the shared event queue. Producers block (cooperatively) when the
/// loop falls behind, which is the only backpressure above stop-and-wait.
const EVENT_QUEUE_DEPTH: usize = 256;

/// Create the event queue shared by all producer tasks.
pub fn channel() -> (mpsc::Sender<Event>, mpsc::Receiver<Event>) {
    mpsc::channel(EVENT_QUEUE_DEPTH)
}

/// Spawn the task that forwards stdin to the stdin channel.
pub fn spawn_stdin(events: mpsc::Sender<Event>) {
    tokio::spawn(async move {
        let mut stdin = tokio::io::stdin();
        let mut buf = vec![0u8; MTU];
        loop {
            match stdin.read(&mut buf).await {
                Ok(0) => {
                    let _ = events.send(Event::StdinClosed).await;
                    return;
                }
                Ok(n) => {
                    let event = Event::Stdin(Bytes::copy_from_slice(&buf[..n]));
                    if events.send(event).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    warn!("error reading from stdin: {e}");
                    let _ = events.send(Event::StdinClosed).await;
                    return;
                }
            }
        }
    });
}

/// The multiplexer: reliability state, counters, client writers, and the
/// serial write side. Generic over the serial stream so tests can drive it
/// through an in-memory duplex pipe.
pub struct Mux<W> {
    cfg: Config,
    serial_tx: W,
    link: Link,
    decoder: FrameDecoder,
    stats: Stats,
    clients: Vec<Option<ClientWriter>>,
    tun: Option<TunDevice>,
    stdout: tokio::io::Stdout,
    mcu_addr: Option<Ipv6Addr>,
}

impl<W: AsyncWrite + Unpin> Mux<W> {
    pub fn new(cfg: Config, serial_tx: W, tun: Option<TunDevice>) -> Self {
        let mcu_addr = cfg.mcu_addr();
        Self {
            cfg,
            serial_tx,
            link: Link::new(),
            decoder: FrameDecoder::new(),
            stats: Stats::default(),
            clients: (0..rethos_core::NUM_CHANNELS).map(|_| None).collect(),
            tun,
            stdout: tokio::io::stdout(),
            mcu_addr,
        }
    }

    /// Run the event loop until a fatal error. Never returns `Ok`.
    pub async fn run<R: AsyncRead + Unpin>(
        mut self,
        mut serial_rx: R,
        mut events: mpsc::Receiver<Event>,
    ) -> Result<()> {
        let mut rexmit = interval(self.cfg.rexmit_interval());
        let mut stats_timer = interval(self.cfg.stats_interval());
        let mut ipaddr_timer = interval(self.cfg.ipaddr_interval());
        let mut serial_buf = vec![0u8; MTU];

        loop {
            tokio::select! {
                biased;

                _ = rexmit.tick() => {
                    if let Some(wire) = self.link.rexmit() {
                        debug!("retransmitting unacknowledged data frame");
                        self.write_serial(&wire).await?;
                    }
                }
                _ = stats_timer.tick() => {
                    self.report_stats().await;
                }
                _ = ipaddr_timer.tick() => {
                    if let Some(addr) = self.mcu_addr {
                        let rsp = mcu_addr_response(addr);
                        self.send_data(Channel::COMMAND, &rsp, &mut rexmit).await?;
                    }
                }
                read = serial_rx.read(&mut serial_buf) => {
                    let n = read?;
                    if n == 0 {
                        return Err(Error::protocol("lost serial connection"));
                    }
                    for i in 0..n {
                        let byte = serial_buf[i];
                        self.handle_serial_byte(byte, &mut rexmit).await?;
                    }
                }
                event = events.recv() => {
                    match event {
                        Some(event) => self.handle_event(event, &mut rexmit).await?,
                        None => return Err(Error::protocol("all event sources closed")),
                    }
                }
            }
        }
    }

    async fn handle_serial_byte(&mut self, byte: u8, rexmit: &mut Interval) -> Result<()> {
        match self.decoder.push_byte(byte) {
            Some(DecodeEvent::FrameReady(frame)) => self.handle_frame(frame, rexmit).await,
            Some(DecodeEvent::FrameDropped) => {
                self.stats.global.bad_frames += 1;
                self.stats.global.lost_frames += 1;
                let nack = self.link.nack();
                self.write_serial(&nack).await
            }
            None => Ok(()),
        }
    }

    async fn handle_frame(&mut self, frame: Frame, rexmit: &mut Interval) -> Result<()> {
        self.stats.global.serial_received += 1;
        self.stats.channel[frame.channel.index()].serial_received += 1;

        let reaction = self.link.handle_frame(&frame);
        // The ACK for a frame goes out before its payload moves on.
        for wire in &reaction.wire {
            self.write_serial(wire).await?;
        }

        match reaction.disposition {
            Disposition::Control | Disposition::Duplicate => Ok(()),
            Disposition::Empty { lost } => {
                self.stats.global.lost_frames += u64::from(lost);
                Ok(())
            }
            Disposition::Deliver { lost } => {
                self.stats.global.lost_frames += u64::from(lost);
                self.deliver(frame, rexmit).await
            }
        }
    }

    /// Forward a fresh inbound DATA payload to its primary sink and mirror
    /// it to an attached local client.
    async fn deliver(&mut self, frame: Frame, rexmit: &mut Interval) -> Result<()> {
        let channel = frame.channel;
        debug!("got a frame on channel {channel}");

        match channel {
            Channel::STDIN => {
                self.stdout.write_all(&frame.payload).await?;
                self.stdout.flush().await?;
            }
            Channel::TUNTAP => match &self.tun {
                Some(tun) => tun.send(&frame.payload),
                None => info!("got a packet to forward, but no TUN device: dropping it"),
            },
            Channel::COMMAND => self.handle_command(&frame.payload, rexmit).await?,
            _ => {}
        }

        match &mut self.clients[channel.index()] {
            Some(writer) => match writer.send(frame.payload.clone()).await {
                Ok(()) => {
                    self.stats.global.domain_forwarded += 1;
                    self.stats.channel[channel.index()].domain_forwarded += 1;
                }
                Err(e) => {
                    // The reader side of the endpoint will notice the broken
                    // stream and restore the listener.
                    warn!("write to client on channel {channel} failed: {e}");
                    self.clients[channel.index()] = None;
                }
            },
            None => {
                debug!("no client on channel {channel}: dropping message");
                self.stats.channel[channel.index()].drop_notconnected += 1;
                // Stdin and tuntap payloads already reached their primary
                // sink; only the other channels count as a global drop.
                if channel != Channel::STDIN && channel != Channel::TUNTAP {
                    self.stats.global.drop_notconnected += 1;
                }
            }
        }
        Ok(())
    }

    async fn handle_command(&mut self, payload: &[u8], rexmit: &mut Interval) -> Result<()> {
        let Some(&opcode) = payload.first() else {
            info!("got empty command");
            return Ok(());
        };
        match opcode {
            cmd::GET_MCU_IP_ADDR => {
                info!("got command: get MCU IP address");
                match self.mcu_addr {
                    Some(addr) => {
                        let rsp = mcu_addr_response(addr);
                        self.send_data(Channel::COMMAND, &rsp, rexmit).await?;
                    }
                    None => warn!("MCU address requested but no IPv6 prefix is configured"),
                }
            }
            other => debug!("unknown command opcode 0x{other:02X}"),
        }
        Ok(())
    }

    async fn handle_event(&mut self, event: Event, rexmit: &mut Interval) -> Result<()> {
        match event {
            Event::ClientConnected { channel, writer } => {
                self.clients[channel.index()] = Some(writer);
                Ok(())
            }
            Event::ClientClosed { channel } => {
                self.clients[channel.index()] = None;
                Ok(())
            }
            Event::ClientMessage { channel, payload } => {
                self.stats.global.domain_received += 1;
                self.stats.channel[channel.index()].domain_received += 1;
                self.send_data(channel, &payload, rexmit).await?;
                self.stats.global.serial_forwarded += 1;
                self.stats.channel[channel.index()].serial_forwarded += 1;
                Ok(())
            }
            Event::Stdin(data) => self.send_data(Channel::STDIN, &data, rexmit).await,
            Event::StdinClosed => {
                info!("stdin reached EOF; disabling stdin forwarding");
                Ok(())
            }
            Event::TunPacket(packet) => self.send_data(Channel::TUNTAP, &packet, rexmit).await,
        }
    }

    /// Compose and emit a DATA frame, arming the retransmit timer.
    async fn send_data(
        &mut self,
        channel: Channel,
        payload: &[u8],
        rexmit: &mut Interval,
    ) -> Result<()> {
        let wire = self.link.send_data(channel, payload);
        self.write_serial(&wire).await?;
        rexmit.reset();
        Ok(())
    }

    /// One whole frame per call; no other send may interleave.
    async fn write_serial(&mut self, wire: &[u8]) -> Result<()> {
        self.serial_tx.write_all(wire).await?;
        self.serial_tx.flush().await?;
        Ok(())
    }

    async fn report_stats(&mut self) {
        info!("link statistics:\n{}", self.stats);
        if let Some(writer) = &mut self.clients[Channel::CONTROL.index()] {
            if let Err(e) = writer.send(self.stats.encode()).await {
                warn!("stats push to channel 0 client failed: {e}");
                self.clients[Channel::CONTROL.index()] = None;
            }
        }
    }
}

/// Payload of the command-channel reply carrying the MCU's IPv6 address.
fn mcu_addr_response(addr: Ipv6Addr) -> Vec<u8> {
    let mut rsp = Vec::with_capacity(17);
    rsp.push(cmd::RSP_GET_MCU_IP_ADDR);
    rsp.extend_from_slice(&addr.octets());
    rsp
}

fn interval(period: std::time::Duration) -> Interval {
    // First expiry one full period out, matching freshly armed timers.
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}
