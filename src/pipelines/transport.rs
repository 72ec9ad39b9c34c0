// SPDX-License-Identifier: MPL-2.0

//! Peer transport pipelines
//!
//! The send pipeline re-payloads the capture streams into a webrtcbin. The
//! receive pipeline holds a bare webrtcbin; decode paths are added per remote
//! pad once negotiation exposes them.

use super::recording::{SourceNodes, StreamSource};
use super::topology::{BuiltTopology, NodeId, Topology};
use crate::backends::{ElementSpec, MediaEngine};
use crate::constants::rtp;
use crate::errors::GraphResult;
use crate::session::{InjectionEndpoints, PeerId};
use tracing::info;

pub fn send_pipeline_name(peer: PeerId) -> String {
    format!("send_{}", peer)
}

pub fn recv_pipeline_name(peer: PeerId) -> String {
    format!("recv_{}", peer)
}

fn webrtcbin(stun_server: &str) -> ElementSpec {
    ElementSpec::new("webrtcbin")
        .named("webrtcbin")
        .prop("stun-server", stun_server)
}

/// Source chains feeding a webrtcbin
pub fn outbound_topology(source: &StreamSource, stun_server: &str) -> (Topology, SourceNodes, NodeId) {
    let mut topology = Topology::new("outbound");
    let transport = topology.add(webrtcbin(stun_server));

    let (audio, audio_tail) = topology.chain(
        source.audio_source(),
        [
            ElementSpec::caps_filter(rtp::audio_caps()),
            ElementSpec::new("rtpopusdepay"),
            ElementSpec::new("rtpopuspay").prop("pt", rtp::AUDIO_PAYLOAD_TYPE),
            ElementSpec::new("queue"),
            ElementSpec::caps_filter(rtp::audio_caps()),
            ElementSpec::new("queue"),
        ],
    );
    topology.link_to_request_pad(audio_tail, transport, "sink_%u");

    let (video, video_tail) = topology.chain(
        source.video_source(),
        [
            ElementSpec::caps_filter(rtp::video_caps()),
            ElementSpec::new("rtph264depay"),
            ElementSpec::new("h264parse"),
            ElementSpec::new("rtph264pay")
                .prop("config-interval", -1)
                .prop("pt", rtp::VIDEO_PAYLOAD_TYPE),
            ElementSpec::new("queue"),
            ElementSpec::caps_filter(rtp::video_caps()),
            ElementSpec::new("queue"),
        ],
    );
    topology.link_to_request_pad(video_tail, transport, "sink_%u");

    (topology, SourceNodes { video, audio }, transport)
}

/// Send pipeline of one peer session
pub struct OutboundPipeline<E: MediaEngine> {
    pub pipeline: E::Element,
    pub transport: E::Element,
    pub built: BuiltTopology<E>,
    pub endpoints: Option<InjectionEndpoints<E>>,
}

pub fn build_outbound<E: MediaEngine>(
    engine: &E,
    peer: PeerId,
    source: &StreamSource,
    stun_server: &str,
) -> GraphResult<OutboundPipeline<E>> {
    let name = send_pipeline_name(peer);
    let pipeline = engine.new_pipeline(&name)?;
    let (topology, nodes, transport) = outbound_topology(source, stun_server);
    let built = topology.instantiate(engine, &pipeline)?;

    let endpoints = matches!(source, StreamSource::Injection { .. }).then(|| nodes.endpoints(&built));
    let transport = built.element(transport).clone();
    info!(peer, pipeline = %name, injection = endpoints.is_some(), "Outbound pipeline built");

    Ok(OutboundPipeline {
        pipeline,
        transport,
        built,
        endpoints,
    })
}

/// Receive pipeline of one peer session
pub struct InboundPipeline<E: MediaEngine> {
    pub pipeline: E::Element,
    pub transport: E::Element,
}

pub fn build_inbound<E: MediaEngine>(engine: &E, peer: PeerId, stun_server: &str) -> GraphResult<InboundPipeline<E>> {
    let name = recv_pipeline_name(peer);
    let pipeline = engine.new_pipeline(&name)?;
    let transport = engine.make_element(
        &webrtcbin(stun_server)
            .prop("bundle-policy", "max-bundle")
            .prop("async-handling", true),
    )?;
    engine.add(&pipeline, &transport)?;
    info!(peer, pipeline = %name, "Inbound pipeline built");
    Ok(InboundPipeline { pipeline, transport })
}
