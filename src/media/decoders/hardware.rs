// SPDX-License-Identifier: MPL-2.0

//! H.264 decoder detection

use crate::backends::MediaEngine;
use tracing::{debug, info};

/// H.264 decoders in priority order: VA-API, NVDEC, then libav
pub const H264_DECODER_CANDIDATES: &[&str] = &["vaapih264dec", "nvh264dec", "avdec_h264"];

/// First installed H.264 decoder
///
/// Returns the software decoder when nothing is installed so that the
/// resulting construction error names a real element.
pub fn select_h264_decoder<E: MediaEngine>(engine: &E) -> &'static str {
    for decoder in H264_DECODER_CANDIDATES {
        if engine.has_factory(decoder) {
            info!("✓ {} selected for H.264", decoder);
            return decoder;
        }
        debug!("✗ {} not available", decoder);
    }
    "avdec_h264"
}
