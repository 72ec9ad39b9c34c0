// SPDX-License-Identifier: GPL-3.0-only

//! Decoder utilities
//!
//! Decode sub-paths for remote RTP streams, with hardware H.264 decoders
//! tried before the software one.

mod hardware;
mod pipeline;

pub use hardware::{H264_DECODER_CANDIDATES, select_h264_decoder};
pub use pipeline::{DecodePath, decode_path_for};
