use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;

use super::{Inner, StreamNotification};
use crate::error::{Result, StreamError};
use crate::media::sdp::{RETURN_AUDIO_PAYLOAD_TYPE, TalkbackDescription, generate_talkback_sdp};
use crate::protocol::AudioParameters;
use crate::session::Session;
use crate::transcoder::args::return_audio_args;
use crate::transcoder::{Transcoder, TranscoderRole};
use crate::transport::{RtpDemuxer, TalkbackRelay};

/// Two-way audio setup for one session, run as a task.
///
/// Waits for the client's first return-audio packet, connects to the camera
/// speaker, starts the return-audio transcoder, hands it the SDP and relays
/// its output until either side ends. Aborted by the session's teardown.
pub(super) struct TalkbackSetup {
    inner: Arc<Inner>,
    session_id: String,
    demuxer: Arc<RtpDemuxer>,
    endpoint: SocketAddr,
    sdp: String,
}

impl TalkbackSetup {
    pub(super) fn new(
        inner: Arc<Inner>,
        session: &Session,
        audio: &AudioParameters,
        demuxer: Arc<RtpDemuxer>,
        endpoint: SocketAddr,
    ) -> Self {
        let transport = &session.transport;
        let sdp = generate_talkback_sdp(&TalkbackDescription {
            family: transport.family,
            address: transport.address,
            port: transport.audio_incoming_rtp_port.unwrap_or(0),
            payload_type: RETURN_AUDIO_PAYLOAD_TYPE,
            sample_rate: audio.sample_rate,
            channels: audio.channels,
            srtp: &transport.audio_srtp,
            session_name: &inner.config.sdp_session_name,
        });

        Self {
            inner,
            session_id: session.id.clone(),
            demuxer,
            endpoint,
            sdp,
        }
    }

    pub(super) async fn run(self) {
        match self.establish().await {
            Ok(reason) => {
                tracing::debug!(session_id = %self.session_id, reason, "talkback ended");
            }
            Err(e) => {
                tracing::warn!(session_id = %self.session_id, error = %e, "talkback failed");
                let _ = self
                    .inner
                    .notifications
                    .send(StreamNotification::TalkbackFailed {
                        session_id: self.session_id.clone(),
                        reason: e.to_string(),
                    });
            }
        }
    }

    async fn establish(&self) -> Result<&'static str> {
        let config = &self.inner.config;

        tokio::time::timeout(config.first_packet_timeout, self.demuxer.first_packet())
            .await
            .map_err(|_| StreamError::FirstPacketTimeout(config.first_packet_timeout))??;
        tracing::debug!(session_id = %self.session_id, "return audio flowing");

        let relay = TalkbackRelay::connect(self.endpoint, config.talkback_connect_timeout).await?;

        let mut transcoder = Transcoder::spawn(
            &config.transcoder.binary,
            &return_audio_args(&config.transcoder, self.inner.hints.talkback_sample_rate),
            &self.session_id,
            TranscoderRole::ReturnAudio,
            self.inner.events.clone(),
        )?;
        let stdin = transcoder.take_stdin();
        let stdout = transcoder.take_stdout();

        {
            let mut registry = self.inner.registry.lock();
            match registry.active_mut(&self.session_id) {
                Some(active) => active.transcoders.push(transcoder),
                None => {
                    transcoder.stop();
                    return Err(StreamError::SessionNotFound(self.session_id.clone()));
                }
            }
        }

        if let Some(mut stdin) = stdin {
            stdin.write_all(self.sdp.as_bytes()).await?;
            stdin.shutdown().await?;
        }

        let Some(stdout) = stdout else {
            return Ok("transcoder output unavailable");
        };
        Ok(relay.relay(stdout).await)
    }
}
