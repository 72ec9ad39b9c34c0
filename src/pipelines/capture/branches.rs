// SPDX-License-Identifier: MPL-2.0

//! Sink branches of the capture graph
//!
//! Each builder returns a [`BranchPlan`]: the branch topology plus the tee
//! points its entry nodes attach to. Audio entries are only added when the
//! capture graph has an audio tee.

use super::{BranchEntry, CaptureGraph, SinkBranch, TeePointId};
use crate::backends::{ElementSpec, MediaEngine, StreamKind};
use crate::config::{Config, HlsConfig, LoopbackConfig, UdpConfig};
use crate::constants::{encoder, rtp};
use crate::errors::GraphResult;
use crate::media::H264Encoder;
use crate::pipelines::topology::{NodeId, Topology};
use crate::session::ConsumerRegistry;
use crate::storage::{AnalysisKind, OutputLayout, ensure_dir};
use std::sync::Arc;
use tracing::{info, warn};

pub struct BranchPlan {
    pub topology: Topology,
    pub entries: Vec<BranchEntry>,
    /// Appsinks whose samples go to the consumer registry
    pub taps: Vec<(StreamKind, NodeId)>,
}

impl BranchPlan {
    fn new(topology: Topology) -> Self {
        Self {
            topology,
            entries: Vec::new(),
            taps: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        self.topology.name()
    }
}

fn queue() -> ElementSpec {
    ElementSpec::new("queue")
}

fn hlssink(location: impl ToString, playlist: impl ToString, hls: &HlsConfig) -> ElementSpec {
    ElementSpec::new("hlssink")
        .prop("location", location)
        .prop("playlist-location", playlist)
        .prop("max-files", hls.files)
        .prop("target-duration", hls.duration)
}

fn h264_payloader() -> ElementSpec {
    ElementSpec::new("rtph264pay")
        .prop("config-interval", -1)
        .prop("aggregate-mode", "zero-latency")
        .prop("pt", rtp::VIDEO_PAYLOAD_TYPE)
}

fn opus_payloader() -> ElementSpec {
    ElementSpec::new("rtpopuspay").prop("pt", rtp::AUDIO_PAYLOAD_TYPE)
}

/// Segmented MP4 files below `root/mp4`
pub fn split_file(layout: &OutputLayout, with_audio: bool) -> BranchPlan {
    let mut plan = BranchPlan::new(Topology::new("split-file"));
    let topology = &mut plan.topology;

    let (entry, parse) = topology.chain(
        queue().prop("max-size-time", encoder::QUEUE_MAX_SIZE_TIME_NS),
        [ElementSpec::new("h264parse")],
    );
    let sink = topology.add(
        ElementSpec::new("splitmuxsink")
            .prop("location", layout.mp4_segment_location().display())
            .prop("max-size-time", encoder::SPLIT_MAX_SIZE_TIME_NS)
            .prop("async-handling", true),
    );
    topology.link(parse, sink);
    plan.entries.push(BranchEntry::new(TeePointId::EncodedVideo, entry));

    if with_audio {
        let (audio, parse) = topology.chain(queue(), [ElementSpec::new("opusparse")]);
        topology.link_to_request_pad(parse, sink, "audio_%u");
        plan.entries.push(BranchEntry::new(TeePointId::EncodedAudio, audio));
    }
    plan
}

/// Audio and video HLS below `root/hls`
pub fn av_hls(layout: &OutputLayout, hls: &HlsConfig, with_audio: bool) -> BranchPlan {
    let mut plan = BranchPlan::new(Topology::new("av-hls"));
    let topology = &mut plan.topology;

    let (entry, mux) = topology.chain(
        queue(),
        [ElementSpec::new("h264parse"), ElementSpec::new("mpegtsmux")],
    );
    topology.extend(
        mux,
        [hlssink(
            layout.hls_segment_location().display(),
            layout.hls_playlist().display(),
            hls,
        )],
    );
    plan.entries.push(BranchEntry::new(TeePointId::EncodedVideo, entry));

    if with_audio {
        let (audio, parse) = topology.chain(queue(), [ElementSpec::new("opusparse")]);
        topology.link(parse, mux);
        plan.entries.push(BranchEntry::new(TeePointId::EncodedAudio, audio));
    }
    plan
}

/// MPEG-TS over RTP to a (multicast) UDP destination
pub fn udp_multicast(udp: &UdpConfig, with_audio: bool) -> BranchPlan {
    let mut plan = BranchPlan::new(Topology::new("udp-multicast"));
    let topology = &mut plan.topology;

    let (entry, mux) = topology.chain(
        queue(),
        [ElementSpec::new("mpegtsmux").prop("alignment", encoder::MPEGTS_ALIGNMENT)],
    );
    topology.extend(
        mux,
        [
            ElementSpec::new("rtpmp2tpay"),
            ElementSpec::new("udpsink")
                .prop("host", &udp.host)
                .prop("port", udp.port)
                .prop("auto-multicast", udp.multicast)
                .prop("sync", false)
                .prop("async", false),
        ],
    );
    plan.entries.push(BranchEntry::new(TeePointId::EncodedVideo, entry));

    if with_audio {
        let audio = topology.add(queue());
        topology.link(audio, mux);
        plan.entries.push(BranchEntry::new(TeePointId::EncodedAudio, audio));
    }
    plan
}

fn detector(kind: AnalysisKind, layout: &OutputLayout) -> ElementSpec {
    match kind {
        AnalysisKind::Motion => ElementSpec::new("motioncells")
            .prop("datafile", layout.motion_datafile().display())
            .prop("postallmotion", true),
        AnalysisKind::Face => ElementSpec::new("facedetect")
            .prop("min-stddev", 24)
            .prop("scale-factor", 2.8),
        AnalysisKind::Edge => ElementSpec::new("edgedetect")
            .prop("threshold1", 80)
            .prop("threshold2", 240),
        AnalysisKind::Tracker => ElementSpec::new("cvtracker"),
    }
}

/// Run one analysis element over `source` and publish the result as HLS
pub fn analysis_hls(
    kind: AnalysisKind,
    layout: &OutputLayout,
    hls: &HlsConfig,
    source: TeePointId,
    selected: H264Encoder,
) -> BranchPlan {
    let mut plan = BranchPlan::new(Topology::new(format!("{}-hls", kind.dir_name())));

    let mut specs = vec![
        ElementSpec::new("videoconvert"),
        detector(kind, layout),
        ElementSpec::new("videoconvert"),
    ];
    if hls.show_text {
        specs.push(
            ElementSpec::new("textoverlay")
                .prop("text", kind.dir_name())
                .prop("valignment", "bottom")
                .prop("halignment", "left"),
        );
    }
    if kind == AnalysisKind::Edge {
        specs.push(ElementSpec::new("clockoverlay").prop("time-format", encoder::CLOCK_TIME_FORMAT));
    }
    specs.extend([
        selected.spec(),
        queue(),
        ElementSpec::new("h264parse"),
        ElementSpec::new("mpegtsmux"),
        hlssink(
            layout.analysis_segment_location(kind).display(),
            layout.analysis_playlist(kind).display(),
            hls,
        ),
    ]);

    let (entry, _) = plan.topology.chain(queue(), specs);
    plan.entries.push(BranchEntry::new(source, entry));
    plan
}

fn loopback_udpsink(loopback: &LoopbackConfig, port: u16) -> ElementSpec {
    ElementSpec::new("udpsink")
        .prop("host", &loopback.addr)
        .prop("port", port)
        .prop("auto-multicast", loopback.multicast)
        .prop("sync", false)
        .prop("async", false)
}

/// RTP to the loopback ports read by loopback recordings and peers
pub fn loopback(loopback: &LoopbackConfig, with_audio: bool) -> BranchPlan {
    let mut plan = BranchPlan::new(Topology::new("loopback-rtp"));
    let topology = &mut plan.topology;

    let (entry, _) = topology.chain(
        queue(),
        [
            ElementSpec::new("h264parse"),
            h264_payloader(),
            loopback_udpsink(loopback, loopback.port),
        ],
    );
    plan.entries.push(BranchEntry::new(TeePointId::EncodedVideo, entry));

    if with_audio {
        let (audio, _) = topology.chain(
            queue(),
            [opus_payloader(), loopback_udpsink(loopback, loopback.audio_port())],
        );
        plan.entries.push(BranchEntry::new(TeePointId::EncodedAudio, audio));
    }
    plan
}

fn appsink(name: &str) -> ElementSpec {
    ElementSpec::new("appsink")
        .named(name)
        .prop("emit-signals", true)
        .prop("sync", false)
        .prop("async", false)
}

/// RTP into appsinks whose samples are pushed to every registered consumer
pub fn fan_out(with_audio: bool) -> BranchPlan {
    let mut plan = BranchPlan::new(Topology::new("fan-out"));
    let topology = &mut plan.topology;

    let (entry, sink) = topology.chain(
        queue(),
        [ElementSpec::new("h264parse"), h264_payloader(), appsink("video_sink")],
    );
    plan.entries.push(BranchEntry::new(TeePointId::EncodedVideo, entry));
    plan.taps.push((StreamKind::Video, sink));

    if with_audio {
        let (audio, sink) = topology.chain(queue(), [opus_payloader(), appsink("audio_sink")]);
        plan.entries.push(BranchEntry::new(TeePointId::EncodedAudio, audio));
        plan.taps.push((StreamKind::Audio, sink));
    }
    plan
}

impl<E: MediaEngine> CaptureGraph<E> {
    /// Attach a plan and route its taps into `registry`
    pub fn attach_plan(
        &self,
        plan: &BranchPlan,
        registry: &Arc<ConsumerRegistry<E>>,
    ) -> GraphResult<SinkBranch<E>> {
        let branch = self.attach_branch(&plan.topology, &plan.entries)?;

        for (kind, node) in &plan.taps {
            let kind = *kind;
            let registry = Arc::clone(registry);
            let tapped = self.engine().install_sample_tap(
                branch.element(*node),
                Box::new(move |buffer| registry.fan_out(kind, buffer)),
            );
            if let Err(err) = tapped {
                self.remove_branch(branch);
                return Err(err);
            }
        }
        Ok(branch)
    }
}

/// Branches enabled by `config`
///
/// Loopback RTP runs whenever some consumer may read it: with in-process
/// fan-out disabled, or with peers enabled.
pub fn configured_plans<E: MediaEngine>(graph: &CaptureGraph<E>, config: &Config) -> GraphResult<Vec<BranchPlan>> {
    let layout = graph.layout();
    let with_audio = graph.has_tee(TeePointId::EncodedAudio);
    let mut plans = Vec::new();

    if config.splitfile_sink {
        ensure_dir(&layout.mp4_dir())?;
        plans.push(split_file(layout, with_audio));
    }
    if config.hls_onoff.av_hlssink {
        ensure_dir(&layout.hls_dir())?;
        plans.push(av_hls(layout, &config.hls, with_audio));
    }
    if config.udp.enable {
        plans.push(udp_multicast(&config.udp, with_audio));
    }

    let toggles = &config.hls_onoff;
    for (kind, enabled) in [
        (AnalysisKind::Motion, toggles.motion_hlssink),
        (AnalysisKind::Face, toggles.facedetect_hlssink),
        (AnalysisKind::Edge, toggles.edge_hlssink),
        (AnalysisKind::Tracker, toggles.cvtracker_hlssink),
    ] {
        if enabled {
            ensure_dir(&layout.analysis_dir(kind))?;
            plans.push(analysis_hls(
                kind,
                layout,
                &config.hls,
                graph.analysis_tee(),
                graph.encoder(),
            ));
        }
    }

    if !config.app_sink || config.webrtc.enable {
        plans.push(loopback(&config.webrtc.udpsink, with_audio));
    }
    if config.app_sink {
        plans.push(fan_out(with_audio));
    }
    Ok(plans)
}

/// Attach every configured branch; a failing branch is logged and skipped
pub fn attach_configured<E: MediaEngine>(
    graph: &CaptureGraph<E>,
    config: &Config,
    registry: &Arc<ConsumerRegistry<E>>,
) -> GraphResult<Vec<SinkBranch<E>>> {
    let plans = configured_plans(graph, config)?;
    let mut branches = Vec::with_capacity(plans.len());

    for plan in &plans {
        match graph.attach_plan(plan, registry) {
            Ok(branch) => branches.push(branch),
            Err(err) => warn!(branch = %plan.name(), error = %err, "Sink branch disabled"),
        }
    }

    info!(attached = branches.len(), configured = plans.len(), "Sink branches ready");
    Ok(branches)
}
