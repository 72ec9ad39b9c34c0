// SPDX-License-Identifier: MPL-2.0

//! Media engine abstraction layer
//!
//! Everything above this module talks to the media framework only through
//! [`MediaEngine`]. The production implementation is [`GstEngine`]; unit tests
//! use an in-memory engine that records every call.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │  pipelines (capture graph, session pipelines)  │
//! │  session   (recording, peers, fan-out)         │
//! └──────────────────────┬────────────────────────┘
//!                        │ MediaEngine
//! ┌──────────────────────┴────────────────────────┐
//! │  GstEngine  ──  GStreamer + webrtcbin          │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`types`]: element specs, states, bus/channel/transport events
//! - [`timestamps`]: running-time normalization for fan-out buffers
//! - [`gst_engine`]: GStreamer implementation

pub mod gst_engine;
pub mod timestamps;
pub mod types;

#[cfg(test)]
pub(crate) mod mock;

pub use gst_engine::GstEngine;
pub use types::*;

use crate::errors::GraphResult;
use std::fmt::Debug;
use std::path::Path;

pub type BusHandler = Box<dyn Fn(BusEvent) + Send + Sync>;
pub type ChannelHandler = Box<dyn Fn(ChannelEvent) + Send + Sync>;

/// Capability interface over the media framework
///
/// Handles are cheap reference-counted clones. Every callback registration
/// returns a [`Subscription`] that disconnects on drop.
pub trait MediaEngine: Send + Sync + 'static {
    type Element: Clone + Debug + Send + Sync + 'static;
    type Pad: Clone + Debug + Send + Sync + 'static;
    type Buffer: Clone + Send + 'static;
    type Channel: Clone + Debug + Send + Sync + 'static;

    /// Whether a factory is installed
    fn has_factory(&self, factory: &str) -> bool;

    fn make_element(&self, spec: &ElementSpec) -> GraphResult<Self::Element>;

    fn new_pipeline(&self, name: &str) -> GraphResult<Self::Element>;

    fn element_name(&self, element: &Self::Element) -> String;

    fn add(&self, container: &Self::Element, element: &Self::Element) -> GraphResult<()>;

    fn remove(&self, container: &Self::Element, element: &Self::Element) -> GraphResult<()>;

    /// Link two elements by compatible pads
    fn link(&self, src: &Self::Element, sink: &Self::Element) -> bool;

    /// Link `src` to `sink` once `src` exposes its first source pad
    fn link_on_pad_added(&self, src: &Self::Element, sink: &Self::Element);

    fn request_pad(&self, element: &Self::Element, template: &str) -> Option<Self::Pad>;

    fn static_pad(&self, element: &Self::Element, name: &str) -> Option<Self::Pad>;

    fn link_pads(&self, src: &Self::Pad, sink: &Self::Pad) -> bool;

    fn unlink_pads(&self, src: &Self::Pad, sink: &Self::Pad);

    fn release_pad(&self, element: &Self::Element, pad: &Self::Pad);

    fn set_state(&self, element: &Self::Element, state: PipelineState) -> GraphResult<()>;

    fn sync_state_with_parent(&self, element: &Self::Element) -> GraphResult<()>;

    fn send_eos(&self, element: &Self::Element) -> bool;

    /// Deliver bus messages of `pipeline` on the engine's dispatch thread
    fn subscribe_bus(&self, pipeline: &Self::Element, handler: BusHandler) -> GraphResult<Subscription>;

    /// Block until `pipeline` posts end-of-stream or an error
    fn wait_for_completion(&self, pipeline: &Self::Element) -> BusEvent;

    /// Write a Graphviz description of `pipeline` into `dir`
    fn dump_graph(&self, pipeline: &Self::Element, dir: &Path, name: &str) -> std::io::Result<()>;

    /// Hand every sample reaching an appsink to `handler`, with timestamps in running time
    fn install_sample_tap(
        &self,
        appsink: &Self::Element,
        handler: Box<dyn Fn(Self::Buffer) + Send + Sync>,
    ) -> GraphResult<()>;

    fn push_buffer(&self, appsrc: &Self::Element, buffer: Self::Buffer) -> GraphResult<()>;

    fn create_data_channel(&self, transport: &Self::Element, label: &str) -> GraphResult<Self::Channel>;

    fn observe_channel(&self, channel: &Self::Channel, handler: ChannelHandler) -> Subscription;

    /// Channels announced by the remote peer
    fn observe_remote_channels(
        &self,
        transport: &Self::Element,
        handler: Box<dyn Fn(Self::Channel) + Send + Sync>,
    ) -> Subscription;

    fn send_text(&self, channel: &Self::Channel, text: &str);

    fn send_binary(&self, channel: &Self::Channel, data: &[u8]);

    fn close_channel(&self, channel: &Self::Channel);

    fn observe_transport(
        &self,
        transport: &Self::Element,
        handler: Box<dyn Fn(TransportEvent<Self::Pad>) + Send + Sync>,
    ) -> Subscription;

    fn connection_state(&self, transport: &Self::Element) -> PeerConnectionState;

    fn ice_gathering_state(&self, transport: &Self::Element) -> IceGatheringState;
}
