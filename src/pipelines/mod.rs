// SPDX-License-Identifier: MPL-2.0

//! Media graphs built on top of the engine abstraction
//!
//! # Pipeline Architecture
//!
//! ```text
//! ┌──────────────┐     ┌───────────────────┐     ┌──────────────────┐
//! │ Camera + Mic │ ──▶ │  Capture graph    │ ──▶ │ Files, HLS, UDP  │
//! │ (V4L2, PW)   │     │  - tee points     │     │ loopback RTP     │
//! │              │     │  - sink branches  │     │ fan-out appsinks │
//! └──────────────┘     └───────────────────┘     └────────┬─────────┘
//!                                                         │
//!                         ┌───────────────────────────────┴──────┐
//!                         ▼                                      ▼
//!               ┌───────────────────┐                 ┌───────────────────┐
//!               │ Recording session │                 │  Peer transport   │
//!               │  (Matroska file)  │                 │  (webrtcbin)      │
//!               └───────────────────┘                 └───────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`topology`]: programmatic element graphs with rollback on failure
//! - [`capture`]: the long-lived capture pipeline and its sink branches
//! - [`recording`]: per-session recording pipelines
//! - [`transport`]: per-peer send and receive pipelines

pub mod capture;
pub mod recording;
pub mod topology;
pub mod transport;

pub use capture::{CaptureDevice, CaptureGraph, SinkBranch, TeePointId};
pub use topology::{BuiltTopology, NodeId, Topology};
