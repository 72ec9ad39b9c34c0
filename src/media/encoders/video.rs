// SPDX-License-Identifier: MPL-2.0

//! H.264 encoder selection with hardware acceleration priority

use crate::backends::{ElementSpec, MediaEngine};
use crate::constants::encoder;
use tracing::{debug, info};

/// H.264 encoders in priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum H264Encoder {
    /// VA-API hardware encoder
    Vaapi,
    /// x264 software encoder
    X264,
}

impl H264Encoder {
    pub const PRIORITY: [H264Encoder; 2] = [H264Encoder::Vaapi, H264Encoder::X264];

    pub fn factory(&self) -> &'static str {
        match self {
            H264Encoder::Vaapi => "vaapih264enc",
            H264Encoder::X264 => "x264enc",
        }
    }

    pub fn is_hardware(&self) -> bool {
        matches!(self, H264Encoder::Vaapi)
    }

    /// Element spec with low-latency streaming settings
    pub fn spec(&self) -> ElementSpec {
        let spec = ElementSpec::new(self.factory()).prop("bitrate", encoder::H264_BITRATE_KBPS);
        match self {
            H264Encoder::Vaapi => spec,
            H264Encoder::X264 => spec
                .prop("speed-preset", "ultrafast")
                .prop("tune", "zerolatency")
                .prop("key-int-max", encoder::KEY_INT_MAX),
        }
    }
}

/// Pick the best installed H.264 encoder
///
/// Falls back to x264 even if it is not installed, so that the failure
/// surfaces as a construction error naming a real element.
pub fn select_h264_encoder<E: MediaEngine>(engine: &E) -> H264Encoder {
    for candidate in H264Encoder::PRIORITY {
        if engine.has_factory(candidate.factory()) {
            if candidate.is_hardware() {
                info!(encoder = candidate.factory(), "Using hardware H.264 encoder");
            } else {
                debug!(encoder = candidate.factory(), "Using software H.264 encoder");
            }
            return candidate;
        }
    }
    H264Encoder::X264
}
