use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};

use crate::error::{Result, StreamError};
use crate::media::rtp::{PacketKind, classify};
use crate::protocol::AddressFamily;

/// Default interval for re-sending the last RTCP packet to the RTP target
/// while no RTP arrives.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(3500);

const MAX_DATAGRAM: usize = 65535;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DemuxSignal {
    Waiting,
    Flowing,
    Closed,
}

/// Splits return audio arriving on one UDP port into RTP and RTCP.
///
/// The client sends two-way audio RTP and RTCP to the single port we
/// advertised. The return-audio transcoder expects them on separate ports,
/// so each datagram is forwarded unchanged to either the RTP or the RTCP
/// target according to [`classify`].
///
/// While no RTP arrives (the user is not talking), the last RTCP packet is
/// periodically re-sent to the RTP target so the transcoder's input does not
/// time out.
///
/// The socket is owned by a background task; [`close`](Self::close) stops
/// the task and unbinds the port. Dropping the demuxer closes it too.
#[derive(Debug)]
pub struct RtpDemuxer {
    local_port: u16,
    running: Arc<AtomicBool>,
    signal_tx: Arc<watch::Sender<DemuxSignal>>,
    signal: watch::Receiver<DemuxSignal>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RtpDemuxer {
    /// Bind `port` on the family's wildcard address and start forwarding.
    ///
    /// Must be called from within a Tokio runtime. Port 0 binds an
    /// ephemeral port; see [`local_port`](Self::local_port).
    pub fn bind(
        family: AddressFamily,
        port: u16,
        rtp_target: SocketAddr,
        rtcp_target: SocketAddr,
        heartbeat: Option<Duration>,
    ) -> Result<Self> {
        let socket = std::net::UdpSocket::bind(SocketAddr::new(family.unspecified(), port))?;
        socket.set_nonblocking(true)?;
        let socket = UdpSocket::from_std(socket)?;
        let local_port = socket.local_addr()?.port();

        let (signal_tx, signal) = watch::channel(DemuxSignal::Waiting);
        let signal_tx = Arc::new(signal_tx);
        let running = Arc::new(AtomicBool::new(true));

        let forwarder = Forwarder {
            socket,
            rtp_target,
            rtcp_target,
            signal: signal_tx.clone(),
            last_rtcp: None,
            rtp_since_heartbeat: false,
        };
        let task = tokio::spawn(forwarder.run(heartbeat));

        tracing::debug!(%family, local_port, %rtp_target, %rtcp_target, "RTP demuxer listening");

        Ok(Self {
            local_port,
            running,
            signal_tx,
            signal,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// True from construction until [`close`](Self::close).
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Resolve once the first packet has been forwarded.
    ///
    /// Fails with [`StreamError::DemuxerClosed`] if the demuxer is closed
    /// before any packet arrives.
    pub async fn first_packet(&self) -> Result<()> {
        let mut signal = self.signal.clone();
        let state = signal
            .wait_for(|s| *s != DemuxSignal::Waiting)
            .await
            .map(|s| *s)
            .unwrap_or(DemuxSignal::Closed);

        match state {
            DemuxSignal::Flowing => Ok(()),
            _ => Err(StreamError::DemuxerClosed),
        }
    }

    /// Stop forwarding and unbind the socket. Safe to call more than once.
    pub fn close(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        self.signal_tx.send_replace(DemuxSignal::Closed);
        tracing::debug!(local_port = self.local_port, "RTP demuxer closed");
    }
}

impl Drop for RtpDemuxer {
    fn drop(&mut self) {
        self.close();
    }
}

/// Socket-owning half of the demuxer, run as a task.
struct Forwarder {
    socket: UdpSocket,
    rtp_target: SocketAddr,
    rtcp_target: SocketAddr,
    signal: Arc<watch::Sender<DemuxSignal>>,
    last_rtcp: Option<Vec<u8>>,
    rtp_since_heartbeat: bool,
}

impl Forwarder {
    async fn run(mut self, heartbeat: Option<Duration>) {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let mut ticker = heartbeat.map(|period| {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buf) => match result {
                    Ok((len, from)) => self.forward(&buf[..len], from).await,
                    // ICMP port-unreachable from an earlier send surfaces here on
                    // some platforms; the socket itself is still usable.
                    Err(e) => tracing::debug!(error = %e, "demuxer receive error"),
                },
                _ = tick(&mut ticker) => self.heartbeat().await,
            }
        }
    }

    async fn forward(&mut self, packet: &[u8], from: SocketAddr) {
        let kind = classify(packet);
        let target = match kind {
            PacketKind::Rtp => self.rtp_target,
            PacketKind::Rtcp => self.rtcp_target,
        };

        if let Err(e) = self.socket.send_to(packet, target).await {
            tracing::warn!(error = %e, %target, ?kind, "demuxer forward failed");
            return;
        }
        tracing::trace!(%from, %target, ?kind, len = packet.len(), "forwarded packet");

        match kind {
            PacketKind::Rtp => self.rtp_since_heartbeat = true,
            PacketKind::Rtcp => self.last_rtcp = Some(packet.to_vec()),
        }

        self.signal.send_if_modified(|state| {
            if *state == DemuxSignal::Waiting {
                tracing::debug!(%from, "first return audio packet received");
                *state = DemuxSignal::Flowing;
                true
            } else {
                false
            }
        });
    }

    async fn heartbeat(&mut self) {
        if !std::mem::take(&mut self.rtp_since_heartbeat)
            && let Some(packet) = &self.last_rtcp
        {
            tracing::trace!(target = %self.rtp_target, "demuxer heartbeat");
            let _ = self.socket.send_to(packet, self.rtp_target).await;
        }
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
