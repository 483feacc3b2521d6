use std::net::{IpAddr, SocketAddr};

use clap::{Parser, Subcommand, ValueEnum};
use hkcam::StreamProfile;
use hkcam::media::{CryptoSuite, SrtpParams};
use hkcam::protocol::{
    AddressFamily, AudioCodec, AudioParameters, H264Level, H264Profile, StartRequest,
    VideoParameters,
};
use hkcam::session::{Session, SessionTransport};
use hkcam::transcoder::TranscoderConfig;
use hkcam::transcoder::args::{StreamArgs, return_audio_args};
use hkcam::transport::{DEFAULT_HEARTBEAT_INTERVAL, RtpDemuxer};

#[derive(Parser)]
#[command(
    name = "hkcam-bridge",
    about = "Tools for the camera streaming core"
)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Split RTP and RTCP arriving on one UDP port until Ctrl-C
    Demux {
        /// Address family to bind
        #[arg(long, value_enum, default_value_t = FamilyArg::Ipv4)]
        family: FamilyArg,
        /// Port to listen on
        #[arg(long)]
        port: u16,
        /// Local port RTP is forwarded to
        #[arg(long)]
        rtp_port: u16,
        /// Local port RTCP is forwarded to
        #[arg(long)]
        rtcp_port: u16,
    },
    /// Print the transcoder arguments for a synthetic session
    Args {
        /// Camera RTSP URL
        #[arg(long)]
        url: String,
        /// Client address
        #[arg(long, default_value = "127.0.0.1")]
        address: IpAddr,
        #[arg(long, default_value_t = 1280)]
        width: u32,
        #[arg(long, default_value_t = 720)]
        height: u32,
        #[arg(long, default_value_t = 30)]
        fps: u32,
        /// Video bitrate in kbit/s
        #[arg(long, default_value_t = 299)]
        bitrate: u32,
        /// Re-encode video instead of copying it
        #[arg(long)]
        transcode: bool,
        /// Use the hardware encoder when transcoding
        #[arg(long)]
        hardware: bool,
        /// Also print the return-audio transcoder arguments
        #[arg(long)]
        talkback: bool,
        /// Transcoder binary
        #[arg(long, default_value = "ffmpeg")]
        binary: String,
    },
}

/// Address family CLI argument wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FamilyArg {
    Ipv4,
    Ipv6,
}

impl From<FamilyArg> for AddressFamily {
    fn from(arg: FamilyArg) -> Self {
        match arg {
            FamilyArg::Ipv4 => AddressFamily::Ipv4,
            FamilyArg::Ipv6 => AddressFamily::Ipv6,
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    match args.command {
        Command::Demux {
            family,
            port,
            rtp_port,
            rtcp_port,
        } => {
            let family = AddressFamily::from(family);
            let loopback = family.loopback();
            let demuxer = match RtpDemuxer::bind(
                family,
                port,
                SocketAddr::new(loopback, rtp_port),
                SocketAddr::new(loopback, rtcp_port),
                Some(DEFAULT_HEARTBEAT_INTERVAL),
            ) {
                Ok(demuxer) => demuxer,
                Err(e) => {
                    eprintln!("Failed to start demuxer: {}", e);
                    return;
                }
            };

            println!(
                "Demuxing {} port {} -> RTP {} / RTCP {}; Ctrl-C to stop",
                family,
                demuxer.local_port(),
                rtp_port,
                rtcp_port
            );
            let _ = tokio::signal::ctrl_c().await;
            demuxer.close();
        }
        Command::Args {
            url,
            address,
            width,
            height,
            fps,
            bitrate,
            transcode,
            hardware,
            talkback,
            binary,
        } => {
            let config = TranscoderConfig {
                binary,
                ..Default::default()
            };
            let session = sample_session(address);
            let request = sample_request(width, height, fps, bitrate);
            let profile = StreamProfile {
                channel_id: 0,
                name: "cli".to_string(),
                width,
                height,
                fps,
                bitrate: bitrate.saturating_mul(1000),
                url,
            };

            let stream = StreamArgs {
                session: &session,
                request: &request,
                profile: &profile,
                probe_size: 16384,
                transcode,
                hardware,
                config: &config,
            }
            .build();
            println!("{} {}", config.binary, stream.join(" "));

            if talkback {
                let audio = return_audio_args(&config, 16000);
                println!("{} {}", config.binary, audio.join(" "));
            }
        }
    }
}

fn sample_session(address: IpAddr) -> Session {
    let srtp = SrtpParams::from_key_salt(CryptoSuite::AesCm128HmacSha1_80, &[0u8; 30])
        .unwrap_or_else(SrtpParams::none);
    Session {
        id: "cli".to_string(),
        transport: SessionTransport {
            address,
            family: AddressFamily::of(&address),
            video_port: 50000,
            audio_port: 50002,
            video_return_port: 40001,
            audio_incoming_rtcp_port: 40000,
            audio_incoming_port: None,
            audio_incoming_rtp_port: None,
            video_srtp: srtp.clone(),
            audio_srtp: srtp,
            video_ssrc: 1,
            audio_ssrc: 2,
        },
        has_audio_support: true,
        two_way_audio: false,
        reservations: Vec::new(),
        failed_reservation: None,
    }
}

fn sample_request(width: u32, height: u32, fps: u32, bitrate: u32) -> StartRequest {
    StartRequest {
        session_id: "cli".to_string(),
        video: VideoParameters {
            width,
            height,
            fps,
            max_bitrate: bitrate,
            payload_type: 99,
            mtu: 1378,
            profile: H264Profile::High,
            level: H264Level::Level4_0,
        },
        audio: AudioParameters {
            codec: AudioCodec::AacEld,
            sample_rate: 16000,
            channels: 1,
            max_bitrate: 24,
            payload_type: 110,
            packet_time: 20,
        },
    }
}
