// SPDX-License-Identifier: MPL-2.0

//! Codec element selection
//!
//! Hardware elements are preferred wherever one is installed; software
//! elements are the fallback so every path still builds on a bare system.
//!
//! # Modules
//!
//! - [`decoders`]: decode sub-paths for streams received from peers
//! - [`encoders`]: H.264 encoder selection and availability reporting

pub mod decoders;
pub mod encoders;

pub use decoders::{DecodePath, decode_path_for};
pub use encoders::{H264Encoder, select_h264_encoder};
