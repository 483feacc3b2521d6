//! Streaming session records and their registry.
//!
//! A session is keyed by the host's opaque session ID and owns every
//! resource allocated for it: reserved ports, transcoder processes, the
//! return-audio demuxer and the talkback task.
//!
//! ## Session lifecycle
//!
//! ```text
//! (none) ── prepare ──► Pending ── start ──► Active ── stop ──► (removed)
//!                          └──────────────── stop ─────────────► (removed)
//! ```
//!
//! A session never moves back to pending, and exactly one entry exists per
//! ID. The registry keeps an explicit count of active sessions so the
//! manager can tell when the last one ends without rescanning.

pub mod transport;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::camera::StreamProfile;
use crate::transcoder::Transcoder;
use crate::transport::{PortReservoir, RtpDemuxer};
pub use transport::SessionTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Prepared: ports reserved, nothing running.
    Pending,
    /// Started: transcoder running.
    Active,
}

/// A prepared session.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub transport: SessionTransport,
    /// The camera stream carries audio.
    pub has_audio_support: bool,
    /// Two-way audio was negotiated for this session.
    pub two_way_audio: bool,
    /// Every port reserved for this session, released once at stop.
    pub reservations: Vec<u16>,
    /// Port count of the reservation that failed during prepare, if any.
    pub failed_reservation: Option<u8>,
}

/// A started session and the resources it owns.
#[derive(Debug)]
pub struct ActiveSession {
    pub session: Session,
    pub profile: StreamProfile,
    pub transcoders: Vec<Transcoder>,
    pub demuxer: Option<Arc<RtpDemuxer>>,
    pub talkback: Option<JoinHandle<()>>,
}

impl ActiveSession {
    /// Stop every process and task the session owns.
    fn shutdown(&mut self) {
        for transcoder in &self.transcoders {
            transcoder.stop();
        }
        if let Some(demuxer) = &self.demuxer {
            demuxer.close();
        }
        if let Some(talkback) = self.talkback.take() {
            talkback.abort();
        }
    }
}

#[derive(Debug)]
pub enum SessionEntry {
    Pending(Session),
    Active(ActiveSession),
}

impl SessionEntry {
    pub fn state(&self) -> SessionState {
        match self {
            Self::Pending(_) => SessionState::Pending,
            Self::Active(_) => SessionState::Active,
        }
    }

    pub fn session(&self) -> &Session {
        match self {
            Self::Pending(session) => session,
            Self::Active(active) => &active.session,
        }
    }

    /// Release everything the entry holds.
    ///
    /// Each step runs regardless of the others; none of them can fail.
    pub fn teardown(mut self, ports: &PortReservoir) {
        if let Self::Active(active) = &mut self {
            active.shutdown();
        }
        let session = self.session();
        for &port in &session.reservations {
            ports.free(port);
        }
        tracing::debug!(
            session_id = %session.id,
            released = session.reservations.len(),
            "session resources released"
        );
    }
}

/// Table of prepared and active sessions.
///
/// Owned by the [`StreamingManager`](crate::StreamingManager) behind a
/// mutex; nothing else holds a copy.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    entries: HashMap<String, SessionEntry>,
    active: usize,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a freshly prepared session. Returns the entry it replaced.
    pub fn insert_pending(&mut self, session: Session) -> Option<SessionEntry> {
        let replaced = self
            .entries
            .insert(session.id.clone(), SessionEntry::Pending(session));
        if let Some(SessionEntry::Active(_)) = &replaced {
            self.active -= 1;
        }
        replaced
    }

    pub fn pending(&self, id: &str) -> Option<&Session> {
        match self.entries.get(id) {
            Some(SessionEntry::Pending(session)) => Some(session),
            _ => None,
        }
    }

    /// Replace the pending entry for `active.session.id` with `active`.
    ///
    /// Fails, handing the session back, if no pending entry exists (the
    /// session was stopped while starting).
    pub fn promote(&mut self, active: ActiveSession) -> Result<(), Box<ActiveSession>> {
        match self.entries.get_mut(&active.session.id) {
            Some(entry @ SessionEntry::Pending(_)) => {
                tracing::debug!(session_id = %active.session.id, "session active");
                *entry = SessionEntry::Active(active);
                self.active += 1;
                Ok(())
            }
            _ => Err(Box::new(active)),
        }
    }

    pub fn active(&self, id: &str) -> Option<&ActiveSession> {
        match self.entries.get(id) {
            Some(SessionEntry::Active(active)) => Some(active),
            _ => None,
        }
    }

    pub fn active_mut(&mut self, id: &str) -> Option<&mut ActiveSession> {
        match self.entries.get_mut(id) {
            Some(SessionEntry::Active(active)) => Some(active),
            _ => None,
        }
    }

    /// Take the entry out of the registry.
    ///
    /// The flag is true when the removed entry was the last active session.
    pub fn remove(&mut self, id: &str) -> Option<(SessionEntry, bool)> {
        let entry = self.entries.remove(id)?;
        let mut last_active = false;
        if entry.state() == SessionState::Active {
            self.active -= 1;
            last_active = self.active == 0;
        }
        tracing::debug!(session_id = %id, remaining = self.entries.len(), "session removed");
        Some((entry, last_active))
    }

    pub fn state(&self, id: &str) -> Option<SessionState> {
        self.entries.get(id).map(SessionEntry::state)
    }

    pub fn active_count(&self) -> usize {
        self.active
    }

    pub fn ids(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::srtp::SrtpParams;
    use crate::protocol::AddressFamily;
    use crate::transport::PortRange;

    fn session(id: &str, reservations: Vec<u16>) -> Session {
        Session {
            id: id.to_string(),
            transport: SessionTransport {
                address: "10.0.0.2".parse().unwrap(),
                family: AddressFamily::Ipv4,
                video_port: 50000,
                audio_port: 50002,
                video_return_port: 0,
                audio_incoming_rtcp_port: 0,
                audio_incoming_port: None,
                audio_incoming_rtp_port: None,
                video_srtp: SrtpParams::none(),
                audio_srtp: SrtpParams::none(),
                video_ssrc: 1,
                audio_ssrc: 2,
            },
            has_audio_support: true,
            two_way_audio: false,
            reservations,
            failed_reservation: None,
        }
    }

    fn active(session: Session) -> ActiveSession {
        ActiveSession {
            session,
            profile: StreamProfile {
                channel_id: 0,
                name: "High".into(),
                width: 1920,
                height: 1080,
                fps: 30,
                bitrate: 2_000_000,
                url: "rtsp://camera/high".into(),
            },
            transcoders: Vec::new(),
            demuxer: None,
            talkback: None,
        }
    }

    #[test]
    fn pending_to_active() {
        let mut registry = SessionRegistry::new();
        assert!(registry.insert_pending(session("a", vec![])).is_none());
        assert_eq!(registry.state("a"), Some(SessionState::Pending));
        assert!(registry.pending("a").is_some());

        let s = registry.pending("a").unwrap().clone();
        registry.promote(active(s)).unwrap();
        assert_eq!(registry.state("a"), Some(SessionState::Active));
        assert!(registry.pending("a").is_none());
        assert!(registry.active("a").is_some());
        assert_eq!(registry.active_count(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn promote_without_pending_fails() {
        let mut registry = SessionRegistry::new();
        assert!(registry.promote(active(session("ghost", vec![]))).is_err());
        assert_eq!(registry.active_count(), 0);

        // Already active: a second start does not double count.
        registry.insert_pending(session("a", vec![]));
        registry.promote(active(session("a", vec![]))).unwrap();
        assert!(registry.promote(active(session("a", vec![]))).is_err());
        assert_eq!(registry.active_count(), 1);
    }

    #[test]
    fn last_active_flag() {
        let mut registry = SessionRegistry::new();
        for id in ["a", "b"] {
            registry.insert_pending(session(id, vec![]));
            registry.promote(active(session(id, vec![]))).unwrap();
        }
        registry.insert_pending(session("c", vec![]));

        let (_, last) = registry.remove("c").unwrap();
        assert!(!last, "pending entries never count as last active");
        let (_, last) = registry.remove("a").unwrap();
        assert!(!last);
        let (_, last) = registry.remove("b").unwrap();
        assert!(last);
        assert!(registry.remove("b").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn reprepare_replaces_entry() {
        let mut registry = SessionRegistry::new();
        registry.insert_pending(session("a", vec![1]));
        registry.promote(active(session("a", vec![1]))).unwrap();

        let replaced = registry.insert_pending(session("a", vec![2])).unwrap();
        assert_eq!(replaced.state(), SessionState::Active);
        assert_eq!(registry.active_count(), 0);
        assert_eq!(registry.pending("a").unwrap().reservations, vec![2]);
    }

    #[tokio::test]
    async fn teardown_frees_reservations() {
        let ports = PortReservoir::with_range(PortRange::new(42000, 42009));
        let before = ports.available();
        let a = ports.reserve(AddressFamily::Ipv4, 1).await.unwrap();
        let b = ports.reserve(AddressFamily::Ipv4, 2).await.unwrap();

        let entry = SessionEntry::Active(active(session("a", vec![a, b, b + 1])));
        entry.teardown(&ports);
        assert_eq!(ports.available(), before);
    }
}
