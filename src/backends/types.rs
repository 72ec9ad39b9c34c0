// SPDX-License-Identifier: MPL-2.0

//! Engine-independent descriptions of elements, states and events

use std::fmt;

/// Description of one element to instantiate
///
/// Property values are kept textual; the engine deserializes them into the
/// property's declared type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementSpec {
    pub factory: String,
    pub name: Option<String>,
    pub properties: Vec<(String, String)>,
    /// Source pads only appear after data flows (decodebin and friends)
    pub sometimes_pads: bool,
}

impl ElementSpec {
    pub fn new(factory: impl Into<String>) -> Self {
        Self {
            factory: factory.into(),
            name: None,
            properties: Vec::new(),
            sometimes_pads: false,
        }
    }

    /// Fixed-caps filter
    pub fn caps_filter(caps: impl Into<String>) -> Self {
        Self::new("capsfilter").prop("caps", caps.into())
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn prop(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.properties.push((key.into(), value.to_string()));
        self
    }

    pub fn with_sometimes_pads(mut self) -> Self {
        self.sometimes_pads = true;
        self
    }

    /// Look up a property value previously set on the spec
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Name used in logs and errors
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.factory)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Null,
    Ready,
    Paused,
    Playing,
}

/// Which elementary stream a buffer or endpoint carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Video,
    Audio,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Video => write!(f, "video"),
            StreamKind::Audio => write!(f, "audio"),
        }
    }
}

/// Pipeline bus notification
#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    Eos {
        source: Option<String>,
    },
    Error {
        source: Option<String>,
        message: String,
        debug: Option<String>,
    },
    Warning {
        source: Option<String>,
        message: String,
    },
    StateChanged {
        source: Option<String>,
        old: PipelineState,
        new: PipelineState,
    },
}

impl BusEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BusEvent::Eos { .. } | BusEvent::Error { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
    Unknown,
}

impl PeerConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeerConnectionState::New => "new",
            PeerConnectionState::Connecting => "connecting",
            PeerConnectionState::Connected => "connected",
            PeerConnectionState::Disconnected => "disconnected",
            PeerConnectionState::Failed => "failed",
            PeerConnectionState::Closed => "closed",
            PeerConnectionState::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceGatheringState {
    New,
    Gathering,
    Complete,
    Unknown,
}

impl IceGatheringState {
    pub fn as_str(&self) -> &'static str {
        match self {
            IceGatheringState::New => "new",
            IceGatheringState::Gathering => "gathering",
            IceGatheringState::Complete => "complete",
            IceGatheringState::Unknown => "unknown",
        }
    }
}

/// Data channel notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Open,
    Close,
    Error(String),
    Text(String),
    Binary(Vec<u8>),
}

/// A pad announced by the remote side of a transport
#[derive(Debug, Clone)]
pub struct RemotePad<P> {
    pub pad: P,
    pub name: String,
    /// `media` field of the pad caps ("audio", "video")
    pub media: Option<String>,
    /// `encoding-name` field of the pad caps ("OPUS", "H264", ...)
    pub encoding: Option<String>,
}

/// Transport notification
#[derive(Debug, Clone)]
pub enum TransportEvent<P> {
    ConnectionState(PeerConnectionState),
    IceGatheringState(IceGatheringState),
    PadAdded(RemotePad<P>),
    PadRemoved(String),
    /// A transceiver was created; forward error correction has been enabled on it
    NewTransceiver,
}

/// Single-owner handle to a registered callback
///
/// Dropping or cancelling it disconnects the callback.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A subscription with nothing to disconnect
    pub fn detached() -> Self {
        Self { cancel: None }
    }

    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}
