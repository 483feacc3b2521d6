//! Error types for the streaming session core.

use crate::protocol::AddressFamily;

/// Errors that can occur while preparing, starting or running a stream.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Resources**: [`PortReservationFailed`](Self::PortReservationFailed),
///   [`NoMatchingStreamProfile`](Self::NoMatchingStreamProfile).
/// - **Connectivity**: [`DeviceOffline`](Self::DeviceOffline),
///   [`TalkbackChannelUnavailable`](Self::TalkbackChannelUnavailable),
///   [`FirstPacketTimeout`](Self::FirstPacketTimeout),
///   [`DemuxerClosed`](Self::DemuxerClosed).
/// - **Process**: [`TranscoderSpawnFailed`](Self::TranscoderSpawnFailed),
///   [`TranscoderExitedUnexpectedly`](Self::TranscoderExitedUnexpectedly).
/// - **Session**: [`SessionNotFound`](Self::SessionNotFound).
/// - **Collaborator**: [`Camera`](Self::Camera).
///
/// None of them are fatal to the [`StreamingManager`](crate::StreamingManager);
/// a failure is always scoped to the session that produced it.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The port reservoir could not hand out the requested ports.
    #[error("unable to reserve {count} {family} port(s) for streaming")]
    PortReservationFailed { family: AddressFamily, count: u8 },

    /// The camera has no stream profile that satisfies the request.
    #[error("no stream profile matches {width}x{height} at {bitrate} bps")]
    NoMatchingStreamProfile { width: u32, height: u32, bitrate: u32 },

    /// The camera reports itself offline.
    #[error("device is offline")]
    DeviceOffline,

    /// The camera's talkback endpoint is missing or unreachable.
    #[error("talkback channel unavailable: {0}")]
    TalkbackChannelUnavailable(String),

    /// The transcoder binary could not be launched.
    #[error("failed to spawn transcoder {binary}: {source}")]
    TranscoderSpawnFailed {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    /// A transcoder exited while its session was still running.
    #[error("transcoder ({role}) exited unexpectedly: {exit}")]
    TranscoderExitedUnexpectedly {
        role: crate::transcoder::TranscoderRole,
        exit: crate::transcoder::ExitInfo,
    },

    /// No prepared or active session exists with this ID.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// No return audio arrived before the talkback wait expired.
    #[error("no return audio received within {0:?}")]
    FirstPacketTimeout(std::time::Duration),

    /// The demultiplexer was closed before any packet arrived.
    #[error("RTP demultiplexer closed")]
    DemuxerClosed,

    /// A call into the camera collaborator failed.
    #[error("camera error: {0}")]
    Camera(String),
}

/// Convenience alias for `Result<T, StreamError>`.
pub type Result<T> = std::result::Result<T, StreamError>;
