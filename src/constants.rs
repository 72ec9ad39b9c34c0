// SPDX-License-Identifier: GPL-3.0-only

//! Application-wide constants

use std::time::Duration;

/// RTP payload descriptions shared by the loopback, fan-out and peer paths
pub mod rtp {
    /// Dynamic payload type used for H.264
    pub const VIDEO_PAYLOAD_TYPE: u32 = 96;

    /// Dynamic payload type used for Opus
    pub const AUDIO_PAYLOAD_TYPE: u32 = 97;

    /// RTP clock rate for video
    pub const VIDEO_CLOCK_RATE: u32 = 90_000;

    /// RTP clock rate for Opus
    pub const AUDIO_CLOCK_RATE: u32 = 48_000;

    /// Caps describing the H.264 RTP stream
    pub fn video_caps() -> String {
        format!(
            "application/x-rtp,media=video,clock-rate={},encoding-name=H264,payload={}",
            VIDEO_CLOCK_RATE, VIDEO_PAYLOAD_TYPE
        )
    }

    /// Caps describing the Opus RTP stream
    pub fn audio_caps() -> String {
        format!(
            "application/x-rtp,media=audio,clock-rate={},encoding-name=OPUS,payload={}",
            AUDIO_CLOCK_RATE, AUDIO_PAYLOAD_TYPE
        )
    }
}

/// Loopback transport defaults
pub mod loopback {
    /// Video port; audio uses the next port up
    pub const DEFAULT_PORT: u16 = 6000;

    /// Default destination address
    pub const DEFAULT_ADDRESS: &str = "127.0.0.1";

    /// Port carrying the audio stream for a given base port
    pub fn audio_port(base: u16) -> u16 {
        base.saturating_add(1)
    }
}

/// Timing
pub mod timing {
    use super::Duration;

    /// Interval between connection-state liveness queries
    pub const LIVENESS_INTERVAL: Duration = Duration::from_secs(3);

    /// Time given to a muxer to write its trailer after end-of-stream
    pub const EOS_FINALIZE_DELAY: Duration = Duration::from_millis(500);

    /// Poll timeout of the trigger watcher loop
    pub const WATCH_POLL_INTERVAL: Duration = Duration::from_millis(500);

    /// Default background recording length in seconds
    pub const DEFAULT_RECORD_SECS: u64 = 7;
}

/// Output directory layout below the configured root
pub mod layout {
    pub const RECORD_DIR: &str = "record";
    pub const HLS_DIR: &str = "hls";
    pub const MP4_DIR: &str = "mp4";
    pub const DOT_DIR: &str = "dot";

    /// Files received from peers
    pub const TRANSFER_DIR: &str = "transfer";

    /// Data file base name written by the motion detector
    pub const MOTION_DATAFILE: &str = "motioncells";

    /// File the motion detector touches when motion is observed
    pub const MOTION_MARKER: &str = "motioncells-0.vamc";

    pub const PLAYLIST: &str = "playlist.m3u8";
    pub const HLS_SEGMENT: &str = "segment%05d.ts";
    pub const MP4_SEGMENT: &str = "segment-%05d.mp4";
}

/// Recording file naming
pub mod recording {
    /// Prefix for motion-triggered recordings
    pub const BACKGROUND_PREFIX: &str = "motion";

    /// Prefix for commanded recordings
    pub const EXPLICIT_PREFIX: &str = "webrtc";

    /// Container extension
    pub const CONTAINER_EXTENSION: &str = "mkv";

    /// Dated subdirectory format
    pub const DIR_DATE_FORMAT: &str = "%F";

    /// Timestamp embedded in file names
    pub const FILE_TIME_FORMAT: &str = "%F_%H-%M-%S";

    /// Timestamp format used in log lines
    pub const LOG_TIME_FORMAT: &str = "%F %T";
}

/// Encoder and branch defaults
pub mod encoder {
    /// Target bitrate in kbit/s for both hardware and software H.264
    pub const H264_BITRATE_KBPS: u32 = 8000;

    /// Keyframe interval for the software encoder
    pub const KEY_INT_MAX: u32 = 30;

    /// Profile constraint applied after the primary encoder
    pub const H264_PROFILE_CAPS: &str = "video/x-h264,profile=constrained-baseline";

    /// Clock overlay format
    pub const CLOCK_TIME_FORMAT: &str = "%D %H:%M:%S";

    /// Queue depth in nanoseconds in front of the parsers
    pub const QUEUE_MAX_SIZE_TIME_NS: u64 = 100_000_000;

    /// Split file segment length in nanoseconds
    pub const SPLIT_MAX_SIZE_TIME_NS: u64 = 600_000_000_000;

    /// MPEG-TS alignment for the multicast branch
    pub const MPEGTS_ALIGNMENT: i32 = 7;
}

/// Peer session data channel
pub mod peer {
    /// Text sent when a data channel opens
    pub const GREETING: &str = "Hi! from camhub";

    /// Binary probe sent when a data channel opens
    pub const GREETING_PAYLOAD: &[u8] = b"data";

    /// Default STUN server
    pub const DEFAULT_STUN_SERVER: &str = "stun://stun.l.google.com:19302";
}

/// Application information utilities
pub mod app_info {
    /// Get the application version from build-time environment
    pub fn version() -> &'static str {
        env!("CAMHUB_GIT_VERSION")
    }

    /// Whether decoded video can be shown on a local display
    ///
    /// Only an explicit `tty` session type rules a display out.
    pub fn has_graphical_session() -> bool {
        session_type_allows_display(std::env::var("XDG_SESSION_TYPE").ok().as_deref())
    }

    pub(crate) fn session_type_allows_display(session_type: Option<&str>) -> bool {
        session_type != Some("tty")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rtp_caps_carry_payload_types() {
        assert!(rtp::video_caps().contains("payload=96"));
        assert!(rtp::video_caps().contains("encoding-name=H264"));
        assert!(rtp::audio_caps().contains("payload=97"));
        assert!(rtp::audio_caps().contains("clock-rate=48000"));
    }

    #[test]
    fn test_session_type_probe() {
        assert!(!app_info::session_type_allows_display(Some("tty")));
        assert!(app_info::session_type_allows_display(Some("wayland")));
        assert!(app_info::session_type_allows_display(Some("x11")));
        assert!(app_info::session_type_allows_display(None));
    }

    #[test]
    fn test_audio_port_follows_video_port() {
        assert_eq!(loopback::audio_port(6000), 6001);
        assert_eq!(loopback::audio_port(u16::MAX), u16::MAX);
    }
}
