use crate::media::srtp::SrtpParams;

/// Our side of one negotiated media stream.
#[derive(Debug, Clone)]
pub struct ResponseEndpoint {
    /// Local port the client sends feedback (and, for audio, talkback) to.
    pub port: u16,
    pub ssrc: u32,
    pub srtp: SrtpParams,
}

/// Answer to a [`PrepareRequest`](super::PrepareRequest).
///
/// Always produced, even when port reservation failed: the host reports the
/// failure when it tries to start the session. In that case
/// [`ports_reserved`](Self::ports_reserved) is false and the ports are 0.
#[must_use]
#[derive(Debug, Clone)]
pub struct PrepareResponse {
    pub video: ResponseEndpoint,
    pub audio: ResponseEndpoint,
    pub ports_reserved: bool,
}

impl PrepareResponse {
    pub fn new(video: ResponseEndpoint, audio: ResponseEndpoint) -> Self {
        PrepareResponse {
            video,
            audio,
            ports_reserved: true,
        }
    }

    pub fn with_reservation_failed(mut self) -> Self {
        self.ports_reserved = false;
        self
    }
}
