// SPDX-License-Identifier: MPL-2.0

//! Tee points: named fan-out nodes of the capture graph
//!
//! Each tee point serializes its own attach/detach operations; operations on
//! different tee points never contend.

use crate::backends::MediaEngine;
use crate::errors::{GraphError, GraphResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TeePointId {
    /// Decoded camera frames
    RawVideo,
    /// Primary H.264 stream
    EncodedVideo,
    /// Opus stream
    EncodedAudio,
    /// Hardware post-processed raw video
    PostProcessed,
}

impl TeePointId {
    pub const ALL: [TeePointId; 4] = [
        TeePointId::RawVideo,
        TeePointId::EncodedVideo,
        TeePointId::EncodedAudio,
        TeePointId::PostProcessed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TeePointId::RawVideo => "video_source",
            TeePointId::EncodedVideo => "h264_encoder",
            TeePointId::EncodedAudio => "audio_source",
            TeePointId::PostProcessed => "va_postproc",
        }
    }
}

impl fmt::Display for TeePointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one attached branch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BranchHandle {
    tee: TeePointId,
    id: u64,
}

impl BranchHandle {
    pub fn tee_point(&self) -> TeePointId {
        self.tee
    }
}

/// Which pad of the sink's entry element receives the tee output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryPad {
    /// The always-present `sink` pad
    Sink,
    /// A pad requested from the given template (e.g. `audio_%u`)
    Request(String),
}

struct AttachedBranch<E: MediaEngine> {
    tee_pad: E::Pad,
    sink: E::Element,
    sink_pad: E::Pad,
    sink_pad_requested: bool,
}

pub struct TeePoint<E: MediaEngine> {
    id: TeePointId,
    tee: E::Element,
    branches: Mutex<HashMap<u64, AttachedBranch<E>>>,
    next_branch: AtomicU64,
}

impl<E: MediaEngine> TeePoint<E> {
    pub(crate) fn new(id: TeePointId, tee: E::Element) -> Self {
        Self {
            id,
            tee,
            branches: Mutex::new(HashMap::new()),
            next_branch: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> TeePointId {
        self.id
    }

    pub fn element(&self) -> &E::Element {
        &self.tee
    }

    pub fn branch_count(&self) -> usize {
        self.branches.lock().len()
    }

    pub fn is_attached(&self, handle: BranchHandle) -> bool {
        handle.tee == self.id && self.branches.lock().contains_key(&handle.id)
    }

    /// Request a new tee output and link it to `sink`
    ///
    /// On failure the tee pad is released again; the sink's elements are left
    /// for the caller to release.
    pub(crate) fn attach(&self, engine: &E, sink: &E::Element, entry: &EntryPad) -> GraphResult<BranchHandle> {
        let mut branches = self.branches.lock();
        let link_error = || GraphError::link(self.id, engine.element_name(sink));

        let tee_pad = engine.request_pad(&self.tee, "src_%u").ok_or_else(link_error)?;

        let (sink_pad, sink_pad_requested) = match entry {
            EntryPad::Sink => (engine.static_pad(sink, "sink"), false),
            EntryPad::Request(template) => (engine.request_pad(sink, template), true),
        };
        let Some(sink_pad) = sink_pad else {
            engine.release_pad(&self.tee, &tee_pad);
            return Err(link_error());
        };

        if !engine.link_pads(&tee_pad, &sink_pad) {
            engine.release_pad(&self.tee, &tee_pad);
            if sink_pad_requested {
                engine.release_pad(sink, &sink_pad);
            }
            return Err(link_error());
        }

        let id = self.next_branch.fetch_add(1, Ordering::Relaxed);
        branches.insert(
            id,
            AttachedBranch {
                tee_pad,
                sink: sink.clone(),
                sink_pad,
                sink_pad_requested,
            },
        );
        debug!(tee = %self.id, branch = id, sink = %engine.element_name(sink), "Attached branch");
        Ok(BranchHandle { tee: self.id, id })
    }

    /// Unlink and release a branch; `false` if it was already detached
    pub(crate) fn detach(&self, engine: &E, handle: BranchHandle) -> bool {
        if handle.tee != self.id {
            return false;
        }

        let mut branches = self.branches.lock();
        let Some(branch) = branches.remove(&handle.id) else {
            debug!(tee = %self.id, branch = handle.id, "Branch already detached");
            return false;
        };

        engine.unlink_pads(&branch.tee_pad, &branch.sink_pad);
        engine.release_pad(&self.tee, &branch.tee_pad);
        if branch.sink_pad_requested {
            engine.release_pad(&branch.sink, &branch.sink_pad);
        }
        debug!(tee = %self.id, branch = handle.id, "Detached branch");
        true
    }
}
