// SPDX-License-Identifier: MPL-2.0

//! Sessions layered on the capture graph
//!
//! - [`recording`]: background and explicit recordings with a bounded lifetime
//! - [`peer`]: WebRTC peers with a data channel control protocol
//! - [`consumers`]: injection endpoints fed by the fan-out branch

pub mod consumers;
pub mod peer;
pub mod playback;
pub mod protocol;
pub mod recording;
pub mod transfer;

pub use consumers::{ConsumerId, ConsumerRegistry, InjectionEndpoints};
pub use peer::{PeerId, PeerManager, PeerSourceKind};
pub use playback::{EnginePlayback, PlaybackScheduler};
pub use protocol::{ControlMessage, FileOffer, parse_control_message};
pub use recording::{RecordingInfo, RecordingKind, RecordingManager, RecordingState, RecordingVariant};
pub use transfer::{PendingFileTransfer, WriteOutcome};
