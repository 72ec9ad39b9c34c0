// SPDX-License-Identifier: MPL-2.0

//! Codec availability report
//!
//! Lists which of the elements camhub may use are installed.

use crate::backends::MediaEngine;
use tracing::{info, warn};

/// Elements a pipeline may use, grouped by role
pub const CODEC_GROUPS: &[(&str, &[&str])] = &[
    ("H.264 encoders", &["vaapih264enc", "x264enc"]),
    ("Opus encoder", &["opusenc"]),
    ("H.264 decoders", crate::media::decoders::H264_DECODER_CANDIDATES),
    ("VP8 decoder", &["vp8dec"]),
    ("Opus decoder", &["opusdec"]),
    ("Post-processing", &["vaapipostproc"]),
    ("Analysis", &["motioncells", "facedetect", "edgedetect", "cvtracker"]),
    ("Transport", &["webrtcbin", "hlssink", "splitmuxsink", "udpsink"]),
];

/// Availability of every element in [`CODEC_GROUPS`]
pub fn available_codecs<E: MediaEngine>(engine: &E) -> Vec<(&'static str, &'static str, bool)> {
    CODEC_GROUPS
        .iter()
        .flat_map(|(group, factories)| {
            factories
                .iter()
                .map(move |factory| (*group, *factory, engine.has_factory(factory)))
        })
        .collect()
}

/// Log the availability report
pub fn log_available_codecs<E: MediaEngine>(engine: &E) {
    info!("=== Available codecs ===");
    for (group, factory, available) in available_codecs(engine) {
        if available {
            info!(group, "✓ {}", factory);
        } else {
            warn!(group, "✗ {}", factory);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::mock::MockEngine;

    #[test]
    fn test_report_marks_missing_elements() {
        let engine = MockEngine::new();
        engine.remove_factory("cvtracker");

        let report = available_codecs(engine.as_ref());
        assert!(report.contains(&("Analysis", "cvtracker", false)));
        assert!(report.contains(&("H.264 encoders", "x264enc", true)));
    }
}
