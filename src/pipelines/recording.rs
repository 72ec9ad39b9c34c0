// SPDX-License-Identifier: MPL-2.0

//! Recording session pipelines
//!
//! A session pipeline depayloads the RTP video and audio streams and muxes
//! them into a Matroska file. The streams come either from the loopback UDP
//! ports or from two appsrc endpoints fed by the capture graph's fan-out.

use super::topology::{BuiltTopology, NodeId, Topology};
use crate::backends::{ElementSpec, MediaEngine};
use crate::config::LoopbackConfig;
use crate::constants::rtp;
use crate::errors::GraphResult;
use crate::session::InjectionEndpoints;
use std::path::Path;
use tracing::{debug, info};

/// Where a session pipeline reads its RTP streams from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamSource {
    /// UDP ports written by the loopback branch
    Loopback(LoopbackConfig),
    /// appsrc elements with the given names
    Injection { video: String, audio: String },
}

impl StreamSource {
    pub fn injection(prefix: &str, id: impl std::fmt::Display) -> Self {
        StreamSource::Injection {
            video: format!("video_{}{}", prefix, id),
            audio: format!("audio_{}{}", prefix, id),
        }
    }

    pub(crate) fn video_source(&self) -> ElementSpec {
        match self {
            StreamSource::Loopback(loopback) => udpsrc(loopback, loopback.port),
            StreamSource::Injection { video, .. } => appsrc(video, &rtp::video_caps()),
        }
    }

    pub(crate) fn audio_source(&self) -> ElementSpec {
        match self {
            StreamSource::Loopback(loopback) => udpsrc(loopback, loopback.audio_port()),
            StreamSource::Injection { audio, .. } => appsrc(audio, &rtp::audio_caps()),
        }
    }
}

fn udpsrc(loopback: &LoopbackConfig, port: u16) -> ElementSpec {
    let spec = ElementSpec::new("udpsrc").prop("port", port);
    if loopback.multicast {
        spec.prop("multicast-group", &loopback.addr)
            .prop("auto-multicast", true)
    } else {
        spec
    }
}

fn appsrc(name: &str, caps: &str) -> ElementSpec {
    ElementSpec::new("appsrc")
        .named(name)
        .prop("format", "time")
        .prop("is-live", true)
        .prop("do-timestamp", false)
        .prop("caps", caps)
}

/// Source nodes of a topology, for looking up injection endpoints
#[derive(Debug, Clone, Copy)]
pub struct SourceNodes {
    pub video: NodeId,
    pub audio: NodeId,
}

impl SourceNodes {
    /// The appsrc endpoints of a built topology
    pub fn endpoints<E: MediaEngine>(&self, built: &BuiltTopology<E>) -> InjectionEndpoints<E> {
        InjectionEndpoints {
            video: built.element(self.video).clone(),
            audio: built.element(self.audio).clone(),
        }
    }
}

/// Muxer and file sink fed by both streams
pub fn recording_topology(source: &StreamSource, output: &Path) -> (Topology, SourceNodes) {
    let mut topology = Topology::new("recording");

    let mux = topology.add(ElementSpec::new("matroskamux"));
    topology.extend(
        mux,
        [ElementSpec::new("filesink")
            .prop("location", output.display())
            .prop("async", false)],
    );

    let (video, video_tail) = topology.chain(
        source.video_source(),
        [
            ElementSpec::caps_filter(rtp::video_caps()),
            ElementSpec::new("rtph264depay"),
            ElementSpec::new("h264parse"),
            ElementSpec::new("queue"),
        ],
    );
    topology.link_to_request_pad(video_tail, mux, "video_%u");

    let (audio, audio_tail) = topology.chain(
        source.audio_source(),
        [
            ElementSpec::caps_filter(rtp::audio_caps()),
            ElementSpec::new("rtpopusdepay"),
            ElementSpec::new("opusparse"),
            ElementSpec::new("queue"),
        ],
    );
    topology.link_to_request_pad(audio_tail, mux, "audio_%u");

    (topology, SourceNodes { video, audio })
}

/// A session pipeline ready to be played
pub struct RecordingPipeline<E: MediaEngine> {
    pub pipeline: E::Element,
    pub built: BuiltTopology<E>,
    /// Present for in-process sources
    pub endpoints: Option<InjectionEndpoints<E>>,
}

/// Build `pipeline_name` writing to `output`
pub fn build_recording_pipeline<E: MediaEngine>(
    engine: &E,
    pipeline_name: &str,
    source: &StreamSource,
    output: &Path,
) -> GraphResult<RecordingPipeline<E>> {
    let pipeline = engine.new_pipeline(pipeline_name)?;
    let (topology, nodes) = recording_topology(source, output);
    let built = topology.instantiate(engine, &pipeline)?;

    let endpoints = match source {
        StreamSource::Injection { .. } => Some(nodes.endpoints(&built)),
        StreamSource::Loopback(loopback) => {
            debug!(port = loopback.port, multicast = loopback.multicast, "Recording from loopback RTP");
            None
        }
    };

    info!(pipeline = pipeline_name, output = %output.display(), "Recording pipeline built");
    Ok(RecordingPipeline {
        pipeline,
        built,
        endpoints,
    })
}
