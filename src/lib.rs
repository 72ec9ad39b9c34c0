// SPDX-License-Identifier: MPL-2.0

//! camhub - a live camera fan-out hub
//!
//! One capture graph encodes a V4L2 camera and an audio source once, then fans
//! the streams out to HLS playlists, split MP4 files, UDP multicast, video
//! analysis branches, bounded recordings and WebRTC peers.
//!
//! # Architecture
//!
//! - [`backends`]: the media engine capability interface and its GStreamer implementation
//! - [`pipelines`]: the capture graph, tee points, sink branches and per-session sub-pipelines
//! - [`session`]: recording and peer managers, the consumer registry and the control protocol
//! - [`trigger`]: the filesystem watcher that starts background recordings
//! - [`media`]: encoder and decoder selection
//! - [`config`]: JSON configuration
//! - [`storage`]: output directory layout and recording file names

pub mod backends;
pub mod config;
pub mod constants;
pub mod errors;
pub mod media;
pub mod pipelines;
pub mod session;
pub mod storage;
pub mod trigger;

pub use config::Config;
pub use errors::{AppError, AppResult};
