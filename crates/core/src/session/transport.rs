use std::net::{IpAddr, SocketAddr};

use crate::media::srtp::SrtpParams;
use crate::protocol::AddressFamily;

/// Negotiated media transport for one streaming session.
///
/// Created at prepare from the client's request and the ports reserved for
/// the session. Read-only afterwards.
///
/// ```text
///               client                                   bridge
///   video_port      ◄──────── SRTP video ────────  stream transcoder
///                   ────────  video RTCP  ───────►  video_return_port
///   audio_port      ◄──────── SRTP audio ────────  stream transcoder
///                   ────────  audio RTCP  ───────►  audio_incoming_rtcp_port
///
///   two-way audio only:
///                   ── return RTP+RTCP ──►  audio_incoming_port (demuxer)
///                                             ├─RTP──►  audio_incoming_rtp_port
///                                             └─RTCP─►  audio_incoming_rtcp_port
/// ```
#[derive(Debug, Clone)]
pub struct SessionTransport {
    /// Client address media is sent to.
    pub address: IpAddr,
    pub family: AddressFamily,
    /// Client's video RTP port.
    pub video_port: u16,
    /// Client's audio RTP port.
    pub audio_port: u16,
    /// Local port receiving the client's video RTCP.
    pub video_return_port: u16,
    /// Local port receiving the client's audio RTCP.
    pub audio_incoming_rtcp_port: u16,
    /// Local port the demuxer binds for two-way audio.
    pub audio_incoming_port: Option<u16>,
    /// Local even/odd pair the return-audio transcoder listens on.
    pub audio_incoming_rtp_port: Option<u16>,
    pub video_srtp: SrtpParams,
    pub audio_srtp: SrtpParams,
    pub video_ssrc: u32,
    pub audio_ssrc: u32,
}

impl SessionTransport {
    pub fn video_target(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.video_port)
    }

    pub fn audio_target(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.audio_port)
    }

    /// Port advertised to the client for audio: the demuxer when two-way
    /// audio is on, the RTCP port otherwise.
    pub fn advertised_audio_port(&self) -> u16 {
        self.audio_incoming_port
            .unwrap_or(self.audio_incoming_rtcp_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport(two_way: bool) -> SessionTransport {
        SessionTransport {
            address: "192.168.1.20".parse().unwrap(),
            family: AddressFamily::Ipv4,
            video_port: 51000,
            audio_port: 51002,
            video_return_port: 40003,
            audio_incoming_rtcp_port: 40000,
            audio_incoming_port: two_way.then_some(40001),
            audio_incoming_rtp_port: two_way.then_some(40004),
            video_srtp: SrtpParams::none(),
            audio_srtp: SrtpParams::none(),
            video_ssrc: 1,
            audio_ssrc: 2,
        }
    }

    #[test]
    fn targets_use_client_address() {
        let t = transport(false);
        assert_eq!(t.video_target().to_string(), "192.168.1.20:51000");
        assert_eq!(t.audio_target().to_string(), "192.168.1.20:51002");
    }

    #[test]
    fn advertised_audio_port_depends_on_two_way() {
        assert_eq!(transport(false).advertised_audio_port(), 40000);
        assert_eq!(transport(true).advertised_audio_port(), 40001);
    }
}
