use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::media::srtp::SrtpParams;

/// Address family the client asked us to stream over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

impl AddressFamily {
    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => Self::Ipv4,
            IpAddr::V6(_) => Self::Ipv6,
        }
    }

    /// Wildcard address used when binding local sockets.
    pub fn unspecified(&self) -> IpAddr {
        match self {
            Self::Ipv4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            Self::Ipv6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        }
    }

    /// Loopback address, where local relays hand packets to the transcoder.
    pub fn loopback(&self) -> IpAddr {
        match self {
            Self::Ipv4 => IpAddr::V4(Ipv4Addr::LOCALHOST),
            Self::Ipv6 => IpAddr::V6(Ipv6Addr::LOCALHOST),
        }
    }

    /// Address type token for SDP `o=` and `c=` lines.
    pub fn sdp_token(&self) -> &'static str {
        match self {
            Self::Ipv4 => "IP4",
            Self::Ipv6 => "IP6",
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ipv4 => write!(f, "ipv4"),
            Self::Ipv6 => write!(f, "ipv6"),
        }
    }
}

/// Where the client receives one media type, and how it is keyed.
#[derive(Debug, Clone)]
pub struct MediaEndpoint {
    pub port: u16,
    pub srtp: SrtpParams,
}

/// Sent by the host before a stream starts, to negotiate transport.
#[derive(Debug, Clone)]
pub struct PrepareRequest {
    pub session_id: String,
    /// Client address media is sent to.
    pub address: IpAddr,
    pub address_family: AddressFamily,
    pub video: MediaEndpoint,
    pub audio: MediaEndpoint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum H264Profile {
    Baseline,
    Main,
    High,
}

impl H264Profile {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Baseline => "baseline",
            Self::Main => "main",
            Self::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum H264Level {
    Level3_1,
    Level3_2,
    Level4_0,
}

impl H264Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Level3_1 => "3.1",
            Self::Level3_2 => "3.2",
            Self::Level4_0 => "4.0",
        }
    }
}

/// Video parameters selected by the client for this stream.
#[derive(Debug, Clone)]
pub struct VideoParameters {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Maximum bitrate in kbit/s.
    pub max_bitrate: u32,
    pub payload_type: u8,
    pub mtu: u16,
    pub profile: H264Profile,
    pub level: H264Level,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCodec {
    AacEld,
    Opus,
}

/// Audio parameters selected by the client for this stream.
#[derive(Debug, Clone)]
pub struct AudioParameters {
    pub codec: AudioCodec,
    /// Sample rate in Hz (16000 or 24000 in practice).
    pub sample_rate: u32,
    pub channels: u8,
    /// Maximum bitrate in kbit/s.
    pub max_bitrate: u32,
    pub payload_type: u8,
    /// Packet time in milliseconds. Long packet times indicate a
    /// high-latency (typically remote) client.
    pub packet_time: u32,
}

/// Sent by the host to launch a prepared session.
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub session_id: String,
    pub video: VideoParameters,
    pub audio: AudioParameters,
}

/// Sent by the host to change encoding parameters of a running session.
#[derive(Debug, Clone)]
pub struct ReconfigureRequest {
    pub session_id: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Maximum bitrate in kbit/s.
    pub max_bitrate: u32,
}
