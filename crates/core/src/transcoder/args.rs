//! Transcoder argument vectors.
//!
//! The stream transcoder's command line is laid out in four parts:
//!
//! ```text
//! -hide_banner -nostats -loglevel error                         global
//! -fflags +discardcorrupt+genpts -probesize N ... -i rtsp://..  input
//! -map 0:v:0 -codec:v copy|<encoder ...> ... srtp://client:port video output
//! -map 0:a:0? -codec:a libfdk_aac|libopus ... srtp://client:port audio output
//! ```
//!
//! The vector is an opaque contract with an FFmpeg-compatible binary; it is
//! never parsed back.

use crate::camera::StreamProfile;
use crate::media::srtp::SrtpParams;
use crate::protocol::{AudioCodec, StartRequest};
use crate::session::Session;

use super::TranscoderConfig;

/// RTP packet size for video: three MPEG-TS packets.
pub const VIDEO_PACKET_SIZE: u32 = 564;
/// RTP packet size for audio.
pub const AUDIO_PACKET_SIZE: u32 = 188;

/// Maximum input demuxing delay in microseconds.
const MAX_DELAY_US: u32 = 500_000;

/// Inputs for the stream transcoder's argument vector.
#[derive(Debug, Clone)]
pub struct StreamArgs<'a> {
    pub session: &'a Session,
    pub request: &'a StartRequest,
    pub profile: &'a StreamProfile,
    pub probe_size: u32,
    /// Re-encode video instead of copying it.
    pub transcode: bool,
    /// Use the hardware encoder when transcoding.
    pub hardware: bool,
    pub config: &'a TranscoderConfig,
}

impl StreamArgs<'_> {
    pub fn build(&self) -> Vec<String> {
        let mut args = Args::default();
        args.global(self.config);
        self.input(&mut args);
        self.video(&mut args);
        if self.session.has_audio_support {
            self.audio(&mut args);
        }
        args.0
    }

    fn input(&self, args: &mut Args) {
        args.push("-fflags", "+discardcorrupt+genpts");
        args.push("-probesize", self.probe_size);
        args.push("-max_delay", MAX_DELAY_US);
        args.push("-r", self.profile.fps);
        args.push("-rtsp_transport", "tcp");
        args.push("-i", &self.profile.url);
    }

    fn video(&self, args: &mut Args) {
        let video = &self.request.video;
        let transport = &self.session.transport;

        args.push("-map", "0:v:0");
        if self.transcode {
            let encoder = if self.hardware {
                &self.config.hardware_encoder
            } else {
                &self.config.encoder
            };
            args.push("-codec:v", encoder);
            args.push("-pix_fmt", if self.hardware { "yuv420p" } else { "yuvj420p" });
            args.push("-profile:v", video.profile.as_str());
            args.push("-level:v", video.level.as_str());
            if !self.hardware {
                args.push("-preset", "veryfast");
            }
            args.push(
                "-filter:v",
                format!("scale=-2:{},fps={}", video.height, video.fps),
            );
            args.push("-b:v", format!("{}k", video.max_bitrate));
            args.push("-bufsize", format!("{}k", video.max_bitrate.saturating_mul(2)));
            args.push("-maxrate", format!("{}k", video.max_bitrate));
            args.push("-g", video.fps.saturating_mul(2));
            args.push("-bf", 0);
        } else {
            args.push("-codec:v", "copy");
        }

        args.push("-payload_type", video.payload_type);
        args.push("-ssrc", transport.video_ssrc as i32);
        args.push("-f", "rtp");
        args.output(
            &transport.video_srtp,
            format!(
                "{}?rtcpport={}&localrtcpport={}&pkt_size={}",
                transport.video_target(),
                transport.video_port,
                transport.video_return_port,
                VIDEO_PACKET_SIZE
            ),
        );
    }

    fn audio(&self, args: &mut Args) {
        let audio = &self.request.audio;
        let transport = &self.session.transport;

        args.push("-map", "0:a:0?");
        match audio.codec {
            AudioCodec::AacEld => {
                args.push("-codec:a", "libfdk_aac");
                args.push("-profile:a", "aac_eld");
                args.push("-flags", "+global_header");
            }
            AudioCodec::Opus => {
                args.push("-codec:a", "libopus");
                args.push("-application", "lowdelay");
                args.push("-frame_duration", audio.packet_time);
            }
        }
        args.push("-ar", audio.sample_rate);
        args.push("-b:a", format!("{}k", audio.max_bitrate));
        args.push("-ac", audio.channels);

        args.push("-payload_type", audio.payload_type);
        args.push("-ssrc", transport.audio_ssrc as i32);
        args.push("-f", "rtp");
        args.output(
            &transport.audio_srtp,
            format!(
                "{}?rtcpport={}&localrtcpport={}&pkt_size={}",
                transport.audio_target(),
                transport.audio_port,
                transport.audio_incoming_rtcp_port,
                AUDIO_PACKET_SIZE
            ),
        );
    }
}

/// Arguments for the return-audio transcoder.
///
/// It reads the talkback SDP on stdin, receives the client's AAC-ELD audio
/// over SRTP and writes ADTS AAC for the camera speaker on stdout.
pub fn return_audio_args(config: &TranscoderConfig, sample_rate: u32) -> Vec<String> {
    let mut args = Args::default();
    args.global(config);
    args.push("-protocol_whitelist", "crypto,file,pipe,rtp,udp");
    args.push("-f", "sdp");
    args.push("-codec:a", "libfdk_aac");
    args.push("-i", "pipe:0");
    args.push("-map", "0:a:0");
    args.push("-codec:a", "aac");
    args.push("-flags", "+global_header");
    args.push("-ar", sample_rate);
    args.push("-b:a", "64k");
    args.push("-ac", 1);
    args.push("-f", "adts");
    args.0.push("pipe:1".to_string());
    args.0
}

#[derive(Default)]
struct Args(Vec<String>);

impl Args {
    fn push(&mut self, flag: &str, value: impl ToString) {
        self.0.push(flag.to_string());
        self.0.push(value.to_string());
    }

    fn global(&mut self, config: &TranscoderConfig) {
        self.0.push("-hide_banner".to_string());
        self.0.push("-nostats".to_string());
        self.push("-loglevel", if config.verbose { "verbose" } else { "error" });
    }

    /// SRTP output when keyed, plain RTP otherwise.
    fn output(&mut self, srtp: &SrtpParams, target: String) {
        match srtp.suite.name() {
            Some(suite) => {
                self.push("-srtp_out_suite", suite);
                self.push("-srtp_out_params", srtp.inline());
                self.0.push(format!("srtp://{target}"));
            }
            None => self.0.push(format!("rtp://{target}")),
        }
    }
}
