// SPDX-License-Identifier: MPL-2.0

//! Encoder selection
//!
//! - Hardware H.264 (VA-API) first, x264 as the fallback
//! - Availability report for the `encoders` command

pub mod detection;
pub mod video;

pub use detection::log_available_codecs;
pub use video::{H264Encoder, select_h264_encoder};
