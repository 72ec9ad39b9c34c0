// SPDX-License-Identifier: GPL-3.0-only

//! Runtime configuration
//!
//! Loaded from a JSON file. Every section falls back to its defaults, so a
//! file only needs the keys it wants to change.

use crate::constants::{loopback, peer, timing};
use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Capture device settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// V4L2 device node
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    /// v4l2src io-mode (0 auto, 2 mmap, 4 dmabuf)
    pub io_mode: u32,
    /// Media type requested from the device ("video/x-raw" or "image/jpeg")
    pub caps_type: String,
    /// Pixel format for raw capture
    pub format: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            width: 1280,
            height: 720,
            framerate: 30,
            io_mode: 0,
            caps_type: "video/x-raw".to_string(),
            format: "YUY2".to_string(),
        }
    }
}

impl DeviceConfig {
    /// Whether the device delivers JPEG frames that must be decoded first
    pub fn is_jpeg(&self) -> bool {
        self.caps_type == "image/jpeg"
    }
}

/// Per-branch HLS toggles
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HlsToggles {
    pub av_hlssink: bool,
    pub motion_hlssink: bool,
    pub facedetect_hlssink: bool,
    pub edge_hlssink: bool,
    pub cvtracker_hlssink: bool,
}

/// HLS segmenting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HlsConfig {
    /// Segments kept on disk
    pub files: u32,
    /// Target segment duration in seconds
    pub duration: u32,
    /// Label analysis branches with a text overlay
    pub show_text: bool,
}

impl Default for HlsConfig {
    fn default() -> Self {
        Self {
            files: 10,
            duration: 5,
            show_text: false,
        }
    }
}

/// MPEG-TS over RTP multicast branch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UdpConfig {
    pub enable: bool,
    pub multicast: bool,
    pub port: u16,
    pub host: String,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            enable: false,
            multicast: true,
            port: 5000,
            host: "224.1.1.5".to_string(),
        }
    }
}

/// Loopback RTP endpoints shared by the capture graph and its consumers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopbackConfig {
    pub multicast: bool,
    /// Video port; audio uses `port + 1`
    pub port: u16,
    pub addr: String,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            multicast: false,
            port: loopback::DEFAULT_PORT,
            addr: loopback::DEFAULT_ADDRESS.to_string(),
        }
    }
}

impl LoopbackConfig {
    pub fn audio_port(&self) -> u16 {
        loopback::audio_port(self.port)
    }
}

/// Real-time peer transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebrtcConfig {
    pub enable: bool,
    pub stun: String,
    pub udpsink: LoopbackConfig,
}

impl Default for WebrtcConfig {
    fn default() -> Self {
        Self {
            enable: false,
            stun: peer::DEFAULT_STUN_SERVER.to_string(),
            udpsink: LoopbackConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub device: DeviceConfig,
    /// Output root for recordings, segments and diagnostics
    pub root_dir: PathBuf,
    /// Write Graphviz dumps of the capture graph
    pub show_dot: bool,
    /// Segmented MP4 recording of the encoded stream
    pub splitfile_sink: bool,
    /// Feed recordings and peers in-process instead of over loopback RTP
    pub app_sink: bool,
    pub hls_onoff: HlsToggles,
    pub hls: HlsConfig,
    pub udp: UdpConfig,
    /// Background recording length in seconds
    pub rec_len: u64,
    pub webrtc: WebrtcConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: DeviceConfig::default(),
            root_dir: std::env::temp_dir().join("camhub"),
            show_dot: false,
            splitfile_sink: false,
            app_sink: true,
            hls_onoff: HlsToggles::default(),
            hls: HlsConfig::default(),
            udp: UdpConfig::default(),
            rec_len: timing::DEFAULT_RECORD_SECS,
            webrtc: WebrtcConfig::default(),
        }
    }
}

impl Config {
    /// Default location: `$XDG_CONFIG_HOME/camhub/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("camhub").join("config.json"))
    }

    /// Parse a configuration document
    pub fn from_json(json: &str, origin: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(json).map_err(|source| ConfigError::Parse {
            path: origin.to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_json(&json, &path.display().to_string())?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Load `explicit` if given, else the default path if it exists, else defaults
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => {
                debug!("No configuration file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device.device.trim().is_empty() {
            return Err(invalid("device.device", "device path is empty"));
        }
        if self.device.width == 0 || self.device.height == 0 {
            return Err(invalid(
                "device.width/height",
                format!("{}x{} is not a frame size", self.device.width, self.device.height),
            ));
        }
        if self.device.framerate == 0 {
            return Err(invalid("device.framerate", "framerate must be positive"));
        }
        if self.webrtc.udpsink.port == 0 {
            return Err(invalid("webrtc.udpsink.port", "port must be non-zero"));
        }
        Ok(())
    }

    /// Length of motion-triggered recordings
    pub fn background_duration(&self) -> Duration {
        Duration::from_secs(self.rec_len)
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_document_keeps_defaults() {
        let config = Config::from_json(r#"{"rec_len": 12, "device": {"width": 640}}"#, "inline")
            .expect("partial config parses");
        assert_eq!(config.rec_len, 12);
        assert_eq!(config.device.width, 640);
        assert_eq!(config.device.height, 720);
        assert_eq!(config.webrtc.udpsink.port, 6000);
    }

    #[test]
    fn test_zero_framerate_rejected() {
        let err = Config::from_json(r#"{"device": {"framerate": 0}}"#, "inline").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "device.framerate", .. }));
    }
}
