//! Network plumbing shared by streaming sessions.
//!
//! - **Ports** ([`ports`]): process-wide UDP port reservoir. Every session
//!   draws its local RTP/RTCP ports from one [`PortReservoir`].
//!
//! - **Demux** ([`demux`]): splits two-way return audio arriving on a single
//!   UDP port into separate RTP and RTCP flows for the transcoder
//!   (RFC 5761 §4).
//!
//! - **Talkback** ([`talkback`]): TCP connection carrying decoded return
//!   audio to the camera speaker.
//!
//! ```text
//!  client ──RTP+RTCP──► RtpDemuxer ──RTP──►  return-audio  ──ADTS──► TalkbackRelay ──TCP──► camera
//!                                  ──RTCP─►  transcoder
//! ```

pub mod demux;
pub mod ports;
pub mod talkback;

pub use demux::{DEFAULT_HEARTBEAT_INTERVAL, RtpDemuxer};
pub use ports::{PortRange, PortReservoir};
pub use talkback::TalkbackRelay;
