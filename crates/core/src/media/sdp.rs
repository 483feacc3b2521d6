//! SDP (Session Description Protocol) generation for the talkback path
//! (RFC 4566 / RFC 8866).
//!
//! The return-audio transcoder learns where and how to receive the client's
//! microphone audio from this description, fed on its standard input:
//!
//! ```text
//! v=0                                               ← protocol version
//! o=- 0 0 IN IP4 <addr>                             ← origin
//! s=<session-name>                                  ← session name
//! c=IN IP4 <addr>                                   ← connection address
//! t=0 0                                             ← timing (live stream)
//! m=audio <port> RTP/AVP 110                        ← media description
//! b=AS:24                                           ← bandwidth (kbps)
//! a=rtpmap:110 MPEG4-GENERIC/16000/1                ← AAC-ELD, rate/channels
//! a=fmtp:110 profile-level-id=1;mode=AAC-hbr;...    ← RFC 3640 parameters
//! a=crypto:1 AES_CM_128_HMAC_SHA1_80 inline:<key>   ← SDES keying (RFC 4568)
//! ```

use std::net::IpAddr;

use crate::media::srtp::SrtpParams;
use crate::protocol::AddressFamily;

/// Payload type HomeKit-style clients use for return audio.
pub const RETURN_AUDIO_PAYLOAD_TYPE: u8 = 110;

/// AAC-ELD `AudioSpecificConfig` (hex) for a mono stream at the given rate.
///
/// Only the two rates clients negotiate are known; anything else falls back
/// to the 16 kHz configuration.
pub fn aac_eld_config(sample_rate: u32) -> &'static str {
    match sample_rate {
        24000 => "F8EC212C00BC00",
        _ => "F8F0212C00BC00",
    }
}

/// Parameters of the incoming return-audio stream.
#[derive(Debug, Clone)]
pub struct TalkbackDescription<'a> {
    pub family: AddressFamily,
    pub address: IpAddr,
    pub port: u16,
    pub payload_type: u8,
    pub sample_rate: u32,
    pub channels: u8,
    pub srtp: &'a SrtpParams,
    pub session_name: &'a str,
}

/// Generate the SDP body describing the return-audio stream.
pub fn generate_talkback_sdp(desc: &TalkbackDescription<'_>) -> String {
    let ip = desc.family.sdp_token();
    let pt = desc.payload_type;
    let mut sdp: Vec<String> = Vec::new();

    sdp.push("v=0".to_string());
    sdp.push(format!("o=- 0 0 IN {} {}", ip, desc.address));
    sdp.push(format!("s={}", desc.session_name));
    sdp.push(format!("c=IN {} {}", ip, desc.address));
    sdp.push("t=0 0".to_string());
    sdp.push(format!("m=audio {} RTP/AVP {}", desc.port, pt));
    sdp.push("b=AS:24".to_string());
    sdp.push(format!(
        "a=rtpmap:{} MPEG4-GENERIC/{}/{}",
        pt, desc.sample_rate, desc.channels
    ));
    sdp.push(format!(
        "a=fmtp:{} profile-level-id=1;mode=AAC-hbr;sizelength=13;indexlength=3;indexdeltalength=3;config={}",
        pt,
        aac_eld_config(desc.sample_rate)
    ));
    if let Some(suite) = desc.srtp.suite.name() {
        sdp.push(format!("a=crypto:1 {} inline:{}", suite, desc.srtp.inline()));
    }

    tracing::debug!("talkback SDP: {}", sdp.join("\r\n"));

    format!("{}\r\n", sdp.join("\r\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::srtp::CryptoSuite;

    fn srtp() -> SrtpParams {
        SrtpParams::new(CryptoSuite::AesCm128HmacSha1_80, vec![1; 16], vec![2; 14])
    }

    #[test]
    fn generates_ipv4_talkback_sdp() {
        let srtp = srtp();
        let sdp = generate_talkback_sdp(&TalkbackDescription {
            family: AddressFamily::Ipv4,
            address: "192.168.1.20".parse().unwrap(),
            port: 50002,
            payload_type: RETURN_AUDIO_PAYLOAD_TYPE,
            sample_rate: 16000,
            channels: 1,
            srtp: &srtp,
            session_name: "Talkback",
        });

        assert!(sdp.starts_with("v=0\r\n"));
        assert!(sdp.contains("o=- 0 0 IN IP4 192.168.1.20\r\n"));
        assert!(sdp.contains("s=Talkback\r\n"));
        assert!(sdp.contains("c=IN IP4 192.168.1.20\r\n"));
        assert!(sdp.contains("t=0 0\r\n"));
        assert!(sdp.contains("m=audio 50002 RTP/AVP 110\r\n"));
        assert!(sdp.contains("b=AS:24\r\n"));
        assert!(sdp.contains("a=rtpmap:110 MPEG4-GENERIC/16000/1\r\n"));
        assert!(sdp.contains("config=F8F0212C00BC00\r\n"));
        assert!(sdp.contains(&format!(
            "a=crypto:1 AES_CM_128_HMAC_SHA1_80 inline:{}\r\n",
            srtp.inline()
        )));

        let m_idx = sdp.find("m=audio").unwrap();
        let rtpmap_idx = sdp.find("a=rtpmap").unwrap();
        let fmtp_idx = sdp.find("a=fmtp").unwrap();
        assert!(m_idx < rtpmap_idx && rtpmap_idx < fmtp_idx);
        assert!(sdp.ends_with("\r\n"));
    }

    #[test]
    fn ipv6_and_24khz() {
        let srtp = srtp();
        let sdp = generate_talkback_sdp(&TalkbackDescription {
            family: AddressFamily::Ipv6,
            address: "fe80::1".parse().unwrap(),
            port: 50010,
            payload_type: RETURN_AUDIO_PAYLOAD_TYPE,
            sample_rate: 24000,
            channels: 1,
            srtp: &srtp,
            session_name: "Talkback",
        });
        assert!(sdp.contains("c=IN IP6 fe80::1\r\n"));
        assert!(sdp.contains("a=rtpmap:110 MPEG4-GENERIC/24000/1\r\n"));
        assert!(sdp.contains("config=F8EC212C00BC00\r\n"));
    }

    #[test]
    fn unencrypted_has_no_crypto_line() {
        let srtp = SrtpParams::none();
        let sdp = generate_talkback_sdp(&TalkbackDescription {
            family: AddressFamily::Ipv4,
            address: "10.0.0.2".parse().unwrap(),
            port: 50020,
            payload_type: RETURN_AUDIO_PAYLOAD_TYPE,
            sample_rate: 16000,
            channels: 1,
            srtp: &srtp,
            session_name: "Talkback",
        });
        assert!(!sdp.contains("a=crypto"));
    }
}
