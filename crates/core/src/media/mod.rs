//! Media-level helpers: RTP/RTCP classification, SRTP keying and SDP.
//!
//! Nothing here touches pixels or samples. Encoding and decoding are done by
//! the external transcoder; this module only describes the streams to it
//! and to the client.
//!
//! | Concern | Module | RFC |
//! |---------|--------|-----|
//! | RTP/RTCP demux rule, SSRC | [`rtp`] | [RFC 3550](https://tools.ietf.org/html/rfc3550), [RFC 5761](https://tools.ietf.org/html/rfc5761) |
//! | SRTP suites and key/salt | [`srtp`] | [RFC 3711](https://tools.ietf.org/html/rfc3711) |
//! | Talkback session description | [`sdp`] | [RFC 8866](https://tools.ietf.org/html/rfc8866) |

pub mod rtp;
pub mod sdp;
pub mod srtp;

pub use rtp::{PacketKind, classify, generate_ssrc};
pub use srtp::{CryptoSuite, SrtpParams};
