//! Upstream camera boundary.
//!
//! The streaming core never talks to the camera backend directly. Everything
//! it needs (availability, RTSP profiles, bitrate control, the talkback
//! endpoint and timeshift state) goes through [`CameraSource`].

use std::net::SocketAddr;

use async_trait::async_trait;

use crate::error::Result;

/// One RTSP stream the camera offers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamProfile {
    pub channel_id: u32,
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Configured bitrate in bit/s.
    pub bitrate: u32,
    pub url: String,
}

impl StreamProfile {
    pub fn pixels(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Camera-side collaborator consumed by the
/// [`StreamingManager`](crate::StreamingManager).
#[async_trait]
pub trait CameraSource: Send + Sync {
    async fn is_online(&self) -> bool;

    /// All stream profiles the camera currently offers.
    fn profiles(&self) -> Vec<StreamProfile>;

    /// Pick the profile closest to the requested resolution and bitrate.
    ///
    /// Profiles above `max_pixels` are ignored. Prefers the smallest profile
    /// covering the resolution with at least `min_bitrate`, then the smallest
    /// covering the resolution, then the largest available.
    fn find_best_profile(
        &self,
        width: u32,
        height: u32,
        min_bitrate: u32,
        max_pixels: Option<u64>,
    ) -> Option<StreamProfile> {
        let mut candidates: Vec<StreamProfile> = self
            .profiles()
            .into_iter()
            .filter(|p| max_pixels.is_none_or(|max| p.pixels() <= max))
            .collect();
        candidates.sort_by_key(|p| (p.pixels(), p.bitrate));

        let covers = |p: &&StreamProfile| p.width >= width && p.height >= height;

        candidates
            .iter()
            .filter(covers)
            .find(|p| p.bitrate >= min_bitrate)
            .or_else(|| candidates.iter().find(covers))
            .or_else(|| candidates.last())
            .cloned()
    }

    /// Current encoder bitrate of a channel, in bit/s.
    async fn get_bitrate(&self, channel_id: u32) -> Result<u32>;

    async fn set_bitrate(&self, channel_id: u32, bitrate: u32) -> Result<()>;

    /// Where decoded return audio is delivered, if the camera has a speaker.
    async fn talkback_endpoint(&self) -> Option<SocketAddr>;

    /// True while a recording timeshift buffer is consuming the stream.
    async fn is_recording(&self) -> bool {
        false
    }

    async fn restart_timeshift(&self) -> Result<()> {
        Ok(())
    }
}

/// Per-camera streaming hints.
#[derive(Debug, Clone)]
pub struct CameraHints {
    /// Always re-encode video instead of copying the camera's stream.
    pub transcode: bool,
    /// Re-encode when the client looks remote (long audio packet time).
    pub transcode_high_latency: bool,
    /// Use the hardware H.264 encoder and the camera's largest profile.
    pub hardware_transcoding: bool,
    /// Initial transcoder probe size in bytes.
    pub probe_size: u32,
    /// Whether the camera stream carries audio at all.
    pub audio: bool,
    /// Whether two-way audio may be offered to clients.
    pub two_way_audio: bool,
    /// Sample rate the camera speaker expects, in Hz.
    pub talkback_sample_rate: u32,
    /// Upper bound for profile selection, in pixels.
    pub max_pixels: Option<u64>,
}

impl Default for CameraHints {
    fn default() -> Self {
        Self {
            transcode: false,
            transcode_high_latency: true,
            hardware_transcoding: false,
            probe_size: 16384,
            audio: true,
            two_way_audio: false,
            talkback_sample_rate: 16000,
            max_pixels: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Vec<StreamProfile>);

    #[async_trait]
    impl CameraSource for Fixed {
        async fn is_online(&self) -> bool {
            true
        }

        fn profiles(&self) -> Vec<StreamProfile> {
            self.0.clone()
        }

        async fn get_bitrate(&self, _channel_id: u32) -> Result<u32> {
            Ok(0)
        }

        async fn set_bitrate(&self, _channel_id: u32, _bitrate: u32) -> Result<()> {
            Ok(())
        }

        async fn talkback_endpoint(&self) -> Option<SocketAddr> {
            None
        }
    }

    fn profile(channel_id: u32, width: u32, height: u32, bitrate: u32) -> StreamProfile {
        StreamProfile {
            channel_id,
            name: format!("ch{channel_id}"),
            width,
            height,
            fps: 15,
            bitrate,
            url: format!("rtsp://camera/ch{channel_id}"),
        }
    }

    fn camera() -> Fixed {
        Fixed(vec![
            profile(2, 3840, 2160, 8_000_000),
            profile(0, 640, 360, 500_000),
            profile(1, 1920, 1080, 2_000_000),
        ])
    }

    #[test]
    fn smallest_covering_profile_with_bitrate() {
        let best = camera().find_best_profile(1280, 720, 1_000_000, None).unwrap();
        assert_eq!(best.channel_id, 1);
    }

    #[test]
    fn bitrate_is_secondary_to_resolution() {
        // Nothing covers 1080p at 10 Mbit/s; fall back to the 1080p profile.
        let best = camera().find_best_profile(1920, 1080, 10_000_000, None).unwrap();
        assert_eq!(best.channel_id, 1);
    }

    #[test]
    fn oversized_request_gets_largest() {
        let best = camera().find_best_profile(7680, 4320, 0, None).unwrap();
        assert_eq!(best.channel_id, 2);
    }

    #[test]
    fn max_pixels_excludes_large_profiles() {
        let best = camera()
            .find_best_profile(3840, 2160, 0, Some(1920 * 1080))
            .unwrap();
        assert_eq!(best.channel_id, 1);
    }

    #[test]
    fn no_profiles_no_match() {
        assert!(Fixed(Vec::new()).find_best_profile(640, 360, 0, None).is_none());
    }
}
