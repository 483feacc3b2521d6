//! Streaming session manager.
//!
//! Drives every session through its lifecycle for one camera:
//!
//! ```text
//! prepare  ─► reserve ports, generate SSRCs          ─► Pending
//! start    ─► pick profile, save bitrate, spawn       ─► Active
//!             transcoder, demuxer + talkback (two-way)
//! reconfigure ─► push new bitrate (fire-and-forget)
//! stop     ─► kill processes, close demuxer, free ports ─► (removed)
//!             restore bitrate / restart timeshift if last
//! ```
//!
//! Transcoder exits arrive as [`TranscoderEvent`]s on a single control
//! loop. Unexpected exits are published as [`StreamNotification`]s; a
//! stream transcoder that dies on an input I/O failure also grows the
//! probe size (see [`probe`]) and has its session torn down.

pub mod probe;
mod talkback;

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};

use crate::camera::{CameraHints, CameraSource, StreamProfile};
use crate::error::{Result, StreamError};
use crate::media::rtp::generate_ssrc;
use crate::protocol::{
    AddressFamily, PrepareRequest, PrepareResponse, ReconfigureRequest, ResponseEndpoint,
    StartRequest,
};
use crate::session::{
    ActiveSession, Session, SessionEntry, SessionRegistry, SessionState, SessionTransport,
};
use crate::transcoder::args::StreamArgs;
use crate::transcoder::{Transcoder, TranscoderConfig, TranscoderEvent, TranscoderRole};
use crate::transport::{DEFAULT_HEARTBEAT_INTERVAL, PortReservoir, RtpDemuxer};
pub use probe::{ProbeSize, ProbeSizePolicy};

/// Audio packet time (ms) at or above which a client is treated as remote.
pub const HIGH_LATENCY_PACKET_TIME: u32 = 60;

/// Resolution requested when hardware transcoding wants the best source.
const MAX_PROFILE_WIDTH: u32 = 3840;
const MAX_PROFILE_HEIGHT: u32 = 2160;

/// Stderr fragments that mark a transcoder input failure.
const INPUT_FAILURE_MARKERS: &[&str] = &[
    "invalid data found when processing input",
    "input/output error",
    "connection reset by peer",
    "could not find codec parameters",
    "error while decoding",
];

const NOTIFICATION_CAPACITY: usize = 64;

/// Manager configuration.
#[derive(Debug, Clone)]
pub struct StreamingConfig {
    pub transcoder: TranscoderConfig,
    /// How long talkback setup waits for the client's first return-audio
    /// packet.
    pub first_packet_timeout: Duration,
    /// Demuxer RTCP heartbeat interval; `None` disables it.
    pub demux_heartbeat: Option<Duration>,
    pub talkback_connect_timeout: Duration,
    pub probe: ProbeSizePolicy,
    /// `s=` line of the talkback SDP.
    pub sdp_session_name: String,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            transcoder: TranscoderConfig::default(),
            first_packet_timeout: Duration::from_secs(10),
            demux_heartbeat: Some(DEFAULT_HEARTBEAT_INTERVAL),
            talkback_connect_timeout: Duration::from_secs(5),
            probe: ProbeSizePolicy::default(),
            sdp_session_name: "Talkback".to_string(),
        }
    }
}

/// Asynchronous failures of established sessions.
#[derive(Debug, Clone)]
pub enum StreamNotification {
    /// A transcoder exited while its session was active.
    TranscoderFailed {
        session_id: String,
        role: TranscoderRole,
        message: String,
    },
    /// Two-way audio could not be set up or broke down. Video continues.
    TalkbackFailed { session_id: String, reason: String },
    ProbeSizeAdjusted { probe_size: u32, failures: u32 },
}

#[derive(Debug, Clone, Copy)]
struct SavedBitrate {
    channel_id: u32,
    bitrate: u32,
}

struct Inner {
    camera: Arc<dyn CameraSource>,
    hints: CameraHints,
    ports: Arc<PortReservoir>,
    config: StreamingConfig,
    registry: Mutex<SessionRegistry>,
    /// Bitrate before the first session started, shared by all sessions.
    saved_bitrate: Mutex<Option<SavedBitrate>>,
    probe: ProbeSize,
    events: mpsc::UnboundedSender<TranscoderEvent>,
    notifications: broadcast::Sender<StreamNotification>,
}

/// Streaming sessions of one camera.
///
/// Cheap to clone; clones share state. The port reservoir is passed in so
/// several managers (one per camera) can share one pool.
#[derive(Clone)]
pub struct StreamingManager {
    inner: Arc<Inner>,
}

impl StreamingManager {
    /// Create the manager and start its control loop.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        camera: Arc<dyn CameraSource>,
        hints: CameraHints,
        ports: Arc<PortReservoir>,
        config: StreamingConfig,
    ) -> Self {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        let probe = ProbeSize::new(hints.probe_size, config.probe.clone());

        let inner = Arc::new(Inner {
            camera,
            hints,
            ports,
            config,
            registry: Mutex::new(SessionRegistry::new()),
            saved_bitrate: Mutex::new(None),
            probe,
            events,
            notifications,
        });

        tokio::spawn(control_loop(Arc::downgrade(&inner), events_rx));

        Self { inner }
    }

    /// Subscribe to failures of established sessions.
    pub fn subscribe(&self) -> broadcast::Receiver<StreamNotification> {
        self.inner.notifications.subscribe()
    }

    /// Reserve transport for a session and answer the client.
    ///
    /// Never fails: if a port can't be reserved the ports reserved so far
    /// are released, the response is flagged and carries zero ports, and
    /// the failure is reported by [`start`](Self::start).
    pub async fn prepare(&self, request: PrepareRequest) -> PrepareResponse {
        let inner = &self.inner;
        let family = request.address_family;
        let session_id = request.session_id;
        let two_way_audio = inner.hints.audio && inner.hints.two_way_audio;

        let mut claims = PortClaims::new(&inner.ports, family);
        let audio_incoming_rtcp_port = claims.reserve(1).await;
        let (audio_incoming_port, audio_incoming_rtp_port) = if two_way_audio {
            (claims.reserve(1).await, claims.reserve(2).await)
        } else {
            (None, None)
        };
        let video_return_port = claims.reserve(1).await;
        let (reservations, failed_reservation) = claims.finish();

        let transport = SessionTransport {
            address: request.address,
            family,
            video_port: request.video.port,
            audio_port: request.audio.port,
            video_return_port: video_return_port.unwrap_or(0),
            audio_incoming_rtcp_port: audio_incoming_rtcp_port.unwrap_or(0),
            audio_incoming_port,
            audio_incoming_rtp_port,
            video_srtp: request.video.srtp,
            audio_srtp: request.audio.srtp,
            video_ssrc: generate_ssrc(),
            audio_ssrc: generate_ssrc(),
        };

        let mut response = PrepareResponse::new(
            ResponseEndpoint {
                port: transport.video_return_port,
                ssrc: transport.video_ssrc,
                srtp: transport.video_srtp.clone(),
            },
            ResponseEndpoint {
                port: transport.advertised_audio_port(),
                ssrc: transport.audio_ssrc,
                srtp: transport.audio_srtp.clone(),
            },
        );
        if failed_reservation.is_some() {
            response = response.with_reservation_failed();
            response.video.port = 0;
            response.audio.port = 0;
        }

        let session = Session {
            id: session_id.clone(),
            transport,
            has_audio_support: inner.hints.audio,
            two_way_audio,
            reservations,
            failed_reservation,
        };

        let replaced = {
            let mut registry = inner.registry.lock();
            let replaced = registry.insert_pending(session);
            replaced.map(|entry| {
                let last_active =
                    entry.state() == SessionState::Active && registry.active_count() == 0;
                (entry, last_active)
            })
        };
        if let Some((entry, last_active)) = replaced {
            tracing::warn!(session_id = %session_id, "prepare replaced an existing session");
            self.release(entry, last_active).await;
        }

        tracing::info!(
            session_id = %session_id,
            %family,
            two_way_audio,
            ports_reserved = response.ports_reserved,
            "session prepared"
        );
        response
    }

    /// Launch the prepared session.
    pub async fn start(&self, request: StartRequest) -> Result<()> {
        let inner = &self.inner;
        let session_id = request.session_id.as_str();

        if !inner.camera.is_online().await {
            tracing::warn!(session_id, "camera offline, refusing to stream");
            return Err(StreamError::DeviceOffline);
        }

        let session = inner
            .registry
            .lock()
            .pending(session_id)
            .cloned()
            .ok_or_else(|| StreamError::SessionNotFound(session_id.to_string()))?;
        if let Some(count) = session.failed_reservation {
            return Err(StreamError::PortReservationFailed {
                family: session.transport.family,
                count,
            });
        }

        let hints = &inner.hints;
        let transcode = hints.transcode
            || (request.audio.packet_time >= HIGH_LATENCY_PACKET_TIME
                && hints.transcode_high_latency);
        let hardware = transcode && hints.hardware_transcoding;
        let profile = self.select_profile(&request, hardware)?;

        let talkback_endpoint = if session.two_way_audio {
            Some(inner.camera.talkback_endpoint().await.ok_or_else(|| {
                StreamError::TalkbackChannelUnavailable(
                    "camera has no talkback endpoint".to_string(),
                )
            })?)
        } else {
            None
        };

        self.save_bitrate(&profile).await;

        let probe_size = inner.probe.effective();
        let args = StreamArgs {
            session: &session,
            request: &request,
            profile: &profile,
            probe_size,
            transcode,
            hardware,
            config: &inner.config.transcoder,
        }
        .build();
        let transcoder = Transcoder::spawn(
            &inner.config.transcoder.binary,
            &args,
            session_id,
            TranscoderRole::Stream,
            inner.events.clone(),
        )?;

        let demuxer = if session.two_way_audio {
            self.bind_demuxer(&session)
        } else {
            None
        };

        let active = ActiveSession {
            session: session.clone(),
            profile: profile.clone(),
            transcoders: vec![transcoder],
            demuxer: demuxer.clone(),
            talkback: None,
        };
        if let Err(active) = inner.registry.lock().promote(active) {
            tracing::warn!(session_id, "session stopped while starting");
            if let Some(demuxer) = &active.demuxer {
                demuxer.close();
            }
            return Err(StreamError::SessionNotFound(session_id.to_string()));
        }

        tracing::info!(
            session_id,
            profile = %profile.name,
            width = request.video.width,
            height = request.video.height,
            fps = request.video.fps,
            bitrate_kbps = request.video.max_bitrate,
            transcode,
            probe_size,
            "session started"
        );

        self.push_bitrate(
            session_id,
            profile.channel_id,
            request.video.max_bitrate.saturating_mul(1000),
        );

        if let (Some(demuxer), Some(endpoint)) = (demuxer, talkback_endpoint) {
            let setup = talkback::TalkbackSetup::new(
                self.inner.clone(),
                &session,
                &request.audio,
                demuxer,
                endpoint,
            );
            let handle = tokio::spawn(setup.run());
            match inner.registry.lock().active_mut(session_id) {
                Some(active) => active.talkback = Some(handle),
                None => handle.abort(),
            }
        }

        Ok(())
    }

    /// Push a new bitrate for an active session. Unknown sessions are
    /// ignored.
    pub fn reconfigure(&self, request: &ReconfigureRequest) {
        let channel_id = self
            .inner
            .registry
            .lock()
            .active(&request.session_id)
            .map(|active| active.profile.channel_id);

        match channel_id {
            Some(channel_id) => {
                tracing::debug!(
                    session_id = %request.session_id,
                    width = request.width,
                    height = request.height,
                    fps = request.fps,
                    bitrate_kbps = request.max_bitrate,
                    "reconfigure"
                );
                self.push_bitrate(
                    &request.session_id,
                    channel_id,
                    request.max_bitrate.saturating_mul(1000),
                );
            }
            None => {
                tracing::debug!(session_id = %request.session_id, "reconfigure without an active profile");
            }
        }
    }

    /// Tear the session down. Safe to call for unknown or stopped sessions.
    pub async fn stop(&self, session_id: &str) {
        let removed = self.inner.registry.lock().remove(session_id);
        let Some((entry, last_active)) = removed else {
            tracing::debug!(session_id, "stop for unknown session");
            return;
        };
        self.release(entry, last_active).await;
        tracing::info!(session_id, "session stopped");
    }

    /// Stop every prepared and active session.
    pub async fn shutdown(&self) {
        let ids = self.inner.registry.lock().ids();
        tracing::info!(sessions = ids.len(), "stopping all sessions");
        for id in ids {
            self.stop(&id).await;
        }
    }

    /// Grow the probe size after a transcoder input failure.
    ///
    /// Returns the new effective probe size.
    pub fn adjust_probe_size(&self) -> u32 {
        let probe_size = self.inner.probe.record_failure();
        let _ = self
            .inner
            .notifications
            .send(StreamNotification::ProbeSizeAdjusted {
                probe_size,
                failures: self.inner.probe.failures(),
            });
        probe_size
    }

    pub fn effective_probe_size(&self) -> u32 {
        self.inner.probe.effective()
    }

    pub fn session_state(&self, session_id: &str) -> Option<SessionState> {
        self.inner.registry.lock().state(session_id)
    }

    pub fn active_sessions(&self) -> usize {
        self.inner.registry.lock().active_count()
    }

    /// Number of transcoder handles owned by an active session.
    pub fn transcoder_count(&self, session_id: &str) -> usize {
        self.inner
            .registry
            .lock()
            .active(session_id)
            .map_or(0, |active| active.transcoders.len())
    }

    pub fn has_demuxer(&self, session_id: &str) -> bool {
        self.inner
            .registry
            .lock()
            .active(session_id)
            .is_some_and(|active| active.demuxer.is_some())
    }

    fn select_profile(&self, request: &StartRequest, hardware: bool) -> Result<StreamProfile> {
        let camera = &self.inner.camera;
        let max_pixels = self.inner.hints.max_pixels;
        let video = &request.video;
        let bitrate = video.max_bitrate.saturating_mul(1000);

        let profile = if hardware {
            camera.find_best_profile(MAX_PROFILE_WIDTH, MAX_PROFILE_HEIGHT, 0, max_pixels)
        } else {
            camera.find_best_profile(video.width, video.height, bitrate, max_pixels)
        };

        profile.ok_or_else(|| {
            tracing::warn!(
                session_id = %request.session_id,
                width = video.width,
                height = video.height,
                bitrate,
                "no matching stream profile"
            );
            StreamError::NoMatchingStreamProfile {
                width: video.width,
                height: video.height,
                bitrate,
            }
        })
    }

    /// Remember the camera's bitrate before the first session changes it.
    async fn save_bitrate(&self, profile: &StreamProfile) {
        let inner = &self.inner;
        let first = inner.registry.lock().active_count() == 0;
        if !first || inner.saved_bitrate.lock().is_some() {
            return;
        }

        match inner.camera.get_bitrate(profile.channel_id).await {
            Ok(bitrate) => {
                let mut saved = inner.saved_bitrate.lock();
                if saved.is_none() {
                    tracing::debug!(channel_id = profile.channel_id, bitrate, "saved camera bitrate");
                    *saved = Some(SavedBitrate {
                        channel_id: profile.channel_id,
                        bitrate,
                    });
                }
            }
            Err(e) => {
                tracing::warn!(channel_id = profile.channel_id, error = %e, "could not read camera bitrate");
            }
        }
    }

    /// Ask the camera for a new bitrate without waiting for the answer.
    fn push_bitrate(&self, session_id: &str, channel_id: u32, bitrate: u32) {
        let camera = self.inner.camera.clone();
        let session_id = session_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = camera.set_bitrate(channel_id, bitrate).await {
                tracing::warn!(session_id = %session_id, channel_id, bitrate, error = %e, "bitrate push failed");
            }
        });
    }

    fn bind_demuxer(&self, session: &Session) -> Option<Arc<RtpDemuxer>> {
        let transport = &session.transport;
        let (Some(port), Some(rtp_port)) =
            (transport.audio_incoming_port, transport.audio_incoming_rtp_port)
        else {
            return None;
        };
        let loopback = transport.family.loopback();

        match RtpDemuxer::bind(
            transport.family,
            port,
            (loopback, rtp_port).into(),
            (loopback, transport.audio_incoming_rtcp_port).into(),
            self.inner.config.demux_heartbeat,
        ) {
            Ok(demuxer) => Some(Arc::new(demuxer)),
            Err(e) => {
                tracing::warn!(session_id = %session.id, port, error = %e, "two-way audio unavailable, demuxer bind failed");
                self.notify(StreamNotification::TalkbackFailed {
                    session_id: session.id.clone(),
                    reason: format!("return audio port {port} unavailable: {e}"),
                });
                None
            }
        }
    }

    /// Release a removed entry and, if it was the last active session,
    /// hand the camera back.
    async fn release(&self, entry: SessionEntry, last_active: bool) {
        entry.teardown(&self.inner.ports);
        if last_active {
            self.restore_camera().await;
        }
    }

    async fn restore_camera(&self) {
        let camera = &self.inner.camera;

        if camera.is_recording().await {
            // The recording buffer owns the stream settings now.
            self.inner.saved_bitrate.lock().take();
            if let Err(e) = camera.restart_timeshift().await {
                tracing::warn!(error = %e, "timeshift restart failed");
            } else {
                tracing::debug!("timeshift buffer restarted");
            }
            return;
        }

        let saved = self.inner.saved_bitrate.lock().take();
        if let Some(saved) = saved {
            match camera.set_bitrate(saved.channel_id, saved.bitrate).await {
                Ok(()) => tracing::info!(
                    channel_id = saved.channel_id,
                    bitrate = saved.bitrate,
                    "camera bitrate restored"
                ),
                Err(e) => tracing::warn!(
                    channel_id = saved.channel_id,
                    error = %e,
                    "camera bitrate restore failed"
                ),
            }
        }
    }

    fn notify(&self, notification: StreamNotification) {
        // No subscribers is fine.
        let _ = self.inner.notifications.send(notification);
    }

    async fn on_transcoder_event(&self, event: TranscoderEvent) {
        let (session_id, role, message, stderr_tail) = match event {
            TranscoderEvent::Exited { requested: true, .. } => return,
            TranscoderEvent::Exited {
                session_id,
                role,
                exit,
                stderr_tail,
                ..
            } => {
                let message = StreamError::TranscoderExitedUnexpectedly { role, exit }.to_string();
                (session_id, role, message, stderr_tail)
            }
            TranscoderEvent::Failed {
                session_id,
                role,
                error,
            } => (session_id, role, error, Vec::new()),
        };

        if self.session_state(&session_id) != Some(SessionState::Active) {
            tracing::debug!(session_id = %session_id, %role, "transcoder exit after session ended");
            return;
        }

        tracing::error!(
            session_id = %session_id,
            %role,
            stderr = %stderr_tail.join(" | "),
            "{message}"
        );

        if role == TranscoderRole::Stream && is_input_failure(&stderr_tail) {
            self.adjust_probe_size();
        }

        self.notify(StreamNotification::TranscoderFailed {
            session_id: session_id.clone(),
            role,
            message,
        });

        // Without the stream transcoder the session is dead.
        if role == TranscoderRole::Stream {
            self.stop(&session_id).await;
        }
    }
}

impl std::fmt::Debug for StreamingManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingManager")
            .field("sessions", &self.inner.registry.lock().len())
            .field("active", &self.active_sessions())
            .field("probe_size", &self.effective_probe_size())
            .finish()
    }
}

async fn control_loop(inner: Weak<Inner>, mut events: mpsc::UnboundedReceiver<TranscoderEvent>) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        StreamingManager { inner }.on_transcoder_event(event).await;
    }
    tracing::debug!("streaming control loop exited");
}

fn is_input_failure(stderr_tail: &[String]) -> bool {
    stderr_tail.iter().any(|line| {
        let line = line.to_ascii_lowercase();
        INPUT_FAILURE_MARKERS.iter().any(|marker| line.contains(marker))
    })
}

/// All-or-nothing port reservation for one prepare call.
struct PortClaims<'a> {
    ports: &'a PortReservoir,
    family: AddressFamily,
    claimed: Vec<u16>,
    failed: Option<u8>,
}

impl<'a> PortClaims<'a> {
    fn new(ports: &'a PortReservoir, family: AddressFamily) -> Self {
        Self {
            ports,
            family,
            claimed: Vec::new(),
            failed: None,
        }
    }

    /// Reserve `count` ports. After the first failure nothing more is
    /// attempted.
    async fn reserve(&mut self, count: u8) -> Option<u16> {
        if self.failed.is_some() {
            return None;
        }
        match self.ports.reserve(self.family, count).await {
            Ok(port) => {
                self.claimed.extend(port..=port + (count as u16 - 1));
                Some(port)
            }
            Err(e) => {
                tracing::warn!(error = %e, "port reservation failed");
                self.failed = Some(count);
                None
            }
        }
    }

    /// Claimed ports, or none (all released) if any reservation failed.
    fn finish(self) -> (Vec<u16>, Option<u8>) {
        if self.failed.is_some() {
            for &port in &self.claimed {
                self.ports.free(port);
            }
            return (Vec::new(), self.failed);
        }
        (self.claimed, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_failure_markers() {
        let tail = vec![
            "frame=  10 fps=0.0".to_string(),
            "rtsp://camera/ch0: Invalid data found when processing input".to_string(),
        ];
        assert!(is_input_failure(&tail));
        assert!(!is_input_failure(&["Conversion failed!".to_string()]));
        assert!(!is_input_failure(&[]));
    }

    #[tokio::test]
    async fn port_claims_release_on_failure() {
        use crate::transport::PortRange;

        // Three ports: two singles fit, the pair can't.
        let ports = PortReservoir::with_range(PortRange::new(42100, 42102));
        let mut claims = PortClaims::new(&ports, AddressFamily::Ipv4);
        assert!(claims.reserve(1).await.is_some());
        assert!(claims.reserve(1).await.is_some());
        assert!(claims.reserve(2).await.is_none());
        assert!(claims.reserve(1).await.is_none(), "no attempts after a failure");

        let (reserved, failed) = claims.finish();
        assert!(reserved.is_empty());
        assert_eq!(failed, Some(2));
        assert_eq!(ports.available(), 3);
    }

    #[tokio::test]
    async fn port_claims_keep_pairs() {
        use crate::transport::PortRange;

        let ports = PortReservoir::with_range(PortRange::new(42200, 42209));
        let mut claims = PortClaims::new(&ports, AddressFamily::Ipv4);
        claims.reserve(1).await.unwrap();
        let pair = claims.reserve(2).await.unwrap();

        let (reserved, failed) = claims.finish();
        assert!(failed.is_none());
        assert_eq!(reserved.len(), 3);
        assert!(reserved.contains(&pair) && reserved.contains(&(pair + 1)));
    }
}
