// SPDX-License-Identifier: MPL-2.0

//! Capture and fan-out graph
//!
//! One capture pipeline holds the camera and microphone stages. Each stage
//! ends in a tee point; sink branches attach to and detach from tee points at
//! runtime without disturbing the capture source or each other.
//!
//! ```text
//! v4l2src ─► … ─► [video_source] ─┬─► encoder ─► [h264_encoder] ─┬─► split file
//!                                  │                              ├─► HLS / multicast
//!                                  │                              ├─► loopback RTP
//!                                  │                              └─► fan-out appsinks
//!                                  └─► vaapipostproc ─► [va_postproc] ─► analysis HLS
//! pipewiresrc ─► … ─► [audio_source] ─► (audio entries of the branches above)
//! ```

pub mod branches;
mod sources;
pub mod tee;

pub use branches::{BranchPlan, attach_configured};
pub use tee::{BranchHandle, EntryPad, TeePoint, TeePointId};

use crate::backends::{MediaEngine, PipelineState};
use crate::config::Config;
use crate::errors::{GraphError, GraphResult};
use crate::media::{H264Encoder, select_h264_encoder};
use crate::pipelines::topology::{BuiltTopology, NodeId, Topology};
use crate::storage::{OutputLayout, ensure_dir};
use parking_lot::Mutex;
use sources::Stage;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const PIPELINE_NAME: &str = "camhub-capture";

/// One attachment of a branch topology to a tee point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchEntry {
    pub tee: TeePointId,
    pub node: NodeId,
    pub pad: EntryPad,
}

impl BranchEntry {
    pub fn new(tee: TeePointId, node: NodeId) -> Self {
        Self {
            tee,
            node,
            pad: EntryPad::Sink,
        }
    }

    pub fn request(tee: TeePointId, node: NodeId, template: impl Into<String>) -> Self {
        Self {
            tee,
            node,
            pad: EntryPad::Request(template.into()),
        }
    }
}

/// A sink branch living inside the capture pipeline
pub struct SinkBranch<E: MediaEngine> {
    built: BuiltTopology<E>,
    handles: Vec<BranchHandle>,
}

impl<E: MediaEngine> SinkBranch<E> {
    pub fn name(&self) -> &str {
        self.built.name()
    }

    pub fn handles(&self) -> &[BranchHandle] {
        &self.handles
    }

    pub fn element(&self, node: NodeId) -> &E::Element {
        self.built.element(node)
    }
}

pub struct CaptureGraph<E: MediaEngine> {
    engine: Arc<E>,
    pipeline: E::Element,
    tees: HashMap<TeePointId, TeePoint<E>>,
    layout: OutputLayout,
    encoder: H264Encoder,
    analysis_source: TeePointId,
    show_dot: bool,
}

impl<E: MediaEngine> CaptureGraph<E> {
    /// Build the capture stages
    ///
    /// Video capture and the primary encoder are mandatory. Audio capture and
    /// hardware post-processing degrade to an absent tee point.
    pub fn build(engine: Arc<E>, config: &Config) -> GraphResult<Self> {
        let layout = OutputLayout::new(&config.root_dir);
        ensure_dir(layout.root())?;
        if config.show_dot {
            ensure_dir(&layout.dot_dir())?;
        }

        let pipeline = engine.new_pipeline(PIPELINE_NAME)?;
        let mut tees = HashMap::new();

        let encoder = select_h264_encoder(engine.as_ref());
        for stage in [
            sources::video_capture(&config.device),
            sources::h264_encoding(encoder),
        ] {
            let name = stage.topology.name().to_string();
            install_stage(engine.as_ref(), &pipeline, &mut tees, stage).map_err(|err| {
                error!(stage = %name, error = %err, "Mandatory capture stage failed");
                err
            })?;
        }

        if let Err(err) = install_stage(engine.as_ref(), &pipeline, &mut tees, sources::audio_capture()) {
            warn!(error = %err, "Audio capture unavailable, continuing with video only");
        }

        let analysis_source = if engine.has_factory("vaapipostproc") {
            if let Err(err) = install_stage(
                engine.as_ref(),
                &pipeline,
                &mut tees,
                sources::post_processing(&config.device),
            ) {
                warn!(error = %err, "Post-processing stage unavailable");
            }
            TeePointId::PostProcessed
        } else {
            info!("vaapipostproc not installed, analysis branches use raw video");
            TeePointId::RawVideo
        };

        info!(
            tees = ?tees.keys().map(TeePointId::as_str).collect::<Vec<_>>(),
            encoder = encoder.factory(),
            "Capture graph built"
        );

        Ok(Self {
            engine,
            pipeline,
            tees,
            layout,
            encoder,
            analysis_source,
            show_dot: config.show_dot,
        })
    }

    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    pub fn pipeline(&self) -> &E::Element {
        &self.pipeline
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    /// Encoder chosen for the primary stream, reused by analysis branches
    pub fn encoder(&self) -> H264Encoder {
        self.encoder
    }

    /// Tee point feeding the analysis branches
    pub fn analysis_tee(&self) -> TeePointId {
        self.analysis_source
    }

    pub fn has_tee(&self, id: TeePointId) -> bool {
        self.tees.contains_key(&id)
    }

    pub fn tee(&self, id: TeePointId) -> GraphResult<&TeePoint<E>> {
        self.tees
            .get(&id)
            .ok_or(GraphError::UnknownTeePoint(id.as_str()))
    }

    pub fn branch_count(&self, id: TeePointId) -> usize {
        self.tees.get(&id).map_or(0, TeePoint::branch_count)
    }

    /// Link `sink` to a fresh output of the tee point
    pub fn attach_sink(&self, tee: TeePointId, sink: &E::Element, entry: &EntryPad) -> GraphResult<BranchHandle> {
        self.tee(tee)?.attach(self.engine.as_ref(), sink, entry)
    }

    /// Unlink a branch; `false` if it was already detached
    pub fn detach_sink(&self, handle: BranchHandle) -> bool {
        match self.tees.get(&handle.tee_point()) {
            Some(tee) => tee.detach(self.engine.as_ref(), handle),
            None => false,
        }
    }

    /// Instantiate a branch topology and attach each entry to its tee point
    ///
    /// On failure everything the branch took is given back and the rest of the
    /// graph is untouched.
    pub fn attach_branch(&self, topology: &Topology, entries: &[BranchEntry]) -> GraphResult<SinkBranch<E>> {
        let engine = self.engine.as_ref();
        let built = topology.instantiate(engine, &self.pipeline)?;

        let mut handles = Vec::with_capacity(entries.len());
        let mut result = Ok(());
        for entry in entries {
            match self.attach_sink(entry.tee, built.element(entry.node), &entry.pad) {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    result = Err(err);
                    break;
                }
            }
        }
        if result.is_ok() {
            result = built.sync_with_parent(engine);
        }

        if let Err(err) = result {
            warn!(branch = %topology.name(), error = %err, "Branch attach failed, releasing");
            for handle in handles {
                self.detach_sink(handle);
            }
            built.release(engine, &self.pipeline);
            return Err(err);
        }

        info!(branch = %topology.name(), entries = handles.len(), "Sink branch attached");
        Ok(SinkBranch { built, handles })
    }

    /// Detach every entry of a branch and release its elements
    pub fn remove_branch(&self, branch: SinkBranch<E>) {
        let SinkBranch { built, handles } = branch;
        for handle in handles {
            self.detach_sink(handle);
        }
        debug!(branch = %built.name(), "Removing sink branch");
        built.release(self.engine.as_ref(), &self.pipeline);
    }

    pub fn start(&self) -> GraphResult<()> {
        self.engine.set_state(&self.pipeline, PipelineState::Playing)?;
        info!("Capture pipeline playing");
        if self.show_dot {
            self.dump_dot("camhub-capture-playing");
        }
        Ok(())
    }

    pub fn stop(&self) -> GraphResult<()> {
        self.engine.set_state(&self.pipeline, PipelineState::Null)?;
        info!("Capture pipeline stopped");
        Ok(())
    }

    /// Write `root/dot/<name>.dot`
    pub fn dump_dot(&self, name: &str) {
        if let Err(err) = self.engine.dump_graph(&self.pipeline, &self.layout.dot_dir(), name) {
            warn!(error = %err, "Failed to write graph dump");
        }
    }
}

fn install_stage<E: MediaEngine>(
    engine: &E,
    pipeline: &E::Element,
    tees: &mut HashMap<TeePointId, TeePoint<E>>,
    stage: Stage,
) -> GraphResult<()> {
    let built = stage.topology.instantiate(engine, pipeline)?;

    if let Some((upstream, entry)) = stage.entry {
        let attached = match tees.get(&upstream) {
            Some(tee) => tee.attach(engine, built.element(entry), &EntryPad::Sink),
            None => Err(GraphError::UnknownTeePoint(upstream.as_str())),
        };
        if let Err(err) = attached {
            built.release(engine, pipeline);
            return Err(err);
        }
    }

    let tee = built.element(stage.tee).clone();
    debug!(tee = %stage.tee_point, stage = %stage.topology.name(), "Capture stage installed");
    tees.insert(stage.tee_point, TeePoint::new(stage.tee_point, tee));
    Ok(())
}

/// Owner of the process-wide capture graph
pub struct CaptureDevice<E: MediaEngine> {
    engine: Arc<E>,
    graph: Mutex<Option<Arc<CaptureGraph<E>>>>,
}

impl<E: MediaEngine> CaptureDevice<E> {
    pub fn new(engine: Arc<E>) -> Self {
        Self {
            engine,
            graph: Mutex::new(None),
        }
    }

    /// Build the capture graph on first call; later calls return the same graph
    pub fn initialize_device(&self, config: &Config) -> GraphResult<Arc<CaptureGraph<E>>> {
        let mut slot = self.graph.lock();
        if let Some(graph) = slot.as_ref() {
            debug!("Capture device already initialized");
            return Ok(Arc::clone(graph));
        }

        info!(device = %config.device.device, "Initializing capture device");
        let graph = Arc::new(CaptureGraph::build(Arc::clone(&self.engine), config)?);
        *slot = Some(Arc::clone(&graph));
        Ok(graph)
    }

    pub fn graph(&self) -> Option<Arc<CaptureGraph<E>>> {
        self.graph.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::ElementSpec;
    use crate::backends::mock::MockEngine;

    fn config(root: &std::path::Path) -> Config {
        Config {
            root_dir: root.to_path_buf(),
            ..Default::default()
        }
    }

    fn queue_branch(name: &str) -> (Topology, NodeId) {
        let mut topology = Topology::new(name);
        let (entry, _) = topology.chain(
            ElementSpec::new("queue").named(format!("{}_queue", name)),
            [ElementSpec::new("fakesink")],
        );
        (topology, entry)
    }

    #[test]
    fn test_build_creates_root_and_tee_points() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("out");
        let engine = MockEngine::new();
        let graph = CaptureGraph::build(Arc::clone(&engine), &config(&root)).unwrap();

        assert!(root.is_dir());
        for id in TeePointId::ALL {
            assert!(graph.has_tee(id), "{} missing", id);
        }
        assert_eq!(graph.analysis_tee(), TeePointId::PostProcessed);
        // encoder and post-processing stages hang off the raw video tee
        assert_eq!(graph.branch_count(TeePointId::RawVideo), 2);
    }

    #[test]
    fn test_missing_encoder_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let engine = MockEngine::new();
        engine.remove_factory("vaapih264enc");
        engine.remove_factory("x264enc");

        let err = CaptureGraph::build(engine, &config(dir.path())).err().unwrap();
        assert!(matches!(err, GraphError::Construction { ref factory, .. } if factory == "x264enc"));
    }

    #[test]
    fn test_optional_stages_degrade() {
        let dir = tempfile::tempdir().unwrap();
        let engine = MockEngine::new();
        engine.remove_factory("pipewiresrc");
        engine.remove_factory("vaapipostproc");

        let graph = CaptureGraph::build(Arc::clone(&engine), &config(dir.path())).unwrap();
        assert!(!graph.has_tee(TeePointId::EncodedAudio));
        assert!(!graph.has_tee(TeePointId::PostProcessed));
        assert_eq!(graph.analysis_tee(), TeePointId::RawVideo);
        assert!(matches!(
            graph.tee(TeePointId::EncodedAudio),
            Err(GraphError::UnknownTeePoint("audio_source"))
        ));
    }

    #[test]
    fn test_detach_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let engine = MockEngine::new();
        let graph = CaptureGraph::build(Arc::clone(&engine), &config(dir.path())).unwrap();

        let sink = engine.make_element(&ElementSpec::new("fakesink")).unwrap();
        let handle = graph
            .attach_sink(TeePointId::EncodedVideo, &sink, &EntryPad::Sink)
            .unwrap();
        assert_eq!(graph.branch_count(TeePointId::EncodedVideo), 1);

        assert!(graph.detach_sink(handle));
        assert!(!graph.detach_sink(handle));
        assert_eq!(graph.branch_count(TeePointId::EncodedVideo), 0);
        assert!(graph.has_tee(TeePointId::EncodedVideo));
    }

    #[test]
    fn test_handles_are_distinct_per_tee() {
        let dir = tempfile::tempdir().unwrap();
        let engine = MockEngine::new();
        let graph = CaptureGraph::build(Arc::clone(&engine), &config(dir.path())).unwrap();
        let sink = engine.make_element(&ElementSpec::new("fakesink")).unwrap();

        let video = graph.attach_sink(TeePointId::EncodedVideo, &sink, &EntryPad::Sink).unwrap();
        let audio = graph.attach_sink(TeePointId::EncodedAudio, &sink, &EntryPad::Sink).unwrap();
        let second = graph.attach_sink(TeePointId::EncodedVideo, &sink, &EntryPad::Sink).unwrap();
        assert_ne!(video, second);

        // detaching on one tee point leaves the other alone
        assert!(graph.detach_sink(audio));
        assert_eq!(graph.branch_count(TeePointId::EncodedVideo), 2);
    }

    #[test]
    fn test_failed_branch_is_rolled_back() {
        let dir = tempfile::tempdir().unwrap();
        let engine = MockEngine::new();
        let graph = CaptureGraph::build(Arc::clone(&engine), &config(dir.path())).unwrap();
        let children_before = graph.pipeline().children().len();

        let mut topology = Topology::new("broken");
        let (video, mux) = topology.chain(ElementSpec::new("queue"), [ElementSpec::new("mpegtsmux")]);
        let audio = topology.add(ElementSpec::new("queue").named("broken_audio"));
        topology.link(audio, mux);
        engine.fail_pad_links_into("broken_audio");

        let err = graph
            .attach_branch(
                &topology,
                &[
                    BranchEntry::new(TeePointId::EncodedVideo, video),
                    BranchEntry::new(TeePointId::EncodedAudio, audio),
                ],
            )
            .err()
            .unwrap();

        assert!(matches!(err, GraphError::Link { .. }));
        assert_eq!(graph.branch_count(TeePointId::EncodedVideo), 0);
        assert_eq!(graph.branch_count(TeePointId::EncodedAudio), 0);
        assert_eq!(graph.pipeline().children().len(), children_before);
    }

    #[test]
    fn test_remove_branch_releases_elements() {
        let dir = tempfile::tempdir().unwrap();
        let engine = MockEngine::new();
        let graph = CaptureGraph::build(Arc::clone(&engine), &config(dir.path())).unwrap();
        let children_before = graph.pipeline().children().len();

        let (topology, entry) = queue_branch("probe");
        let branch = graph
            .attach_branch(&topology, &[BranchEntry::new(TeePointId::RawVideo, entry)])
            .unwrap();
        assert_eq!(graph.pipeline().children().len(), children_before + 2);

        graph.remove_branch(branch);
        assert_eq!(graph.pipeline().children().len(), children_before);
        assert_eq!(graph.branch_count(TeePointId::RawVideo), 2);
    }

    #[test]
    fn test_initialize_device_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let engine = MockEngine::new();
        let device = CaptureDevice::new(Arc::clone(&engine));
        let cfg = config(dir.path());

        let first = device.initialize_device(&cfg).unwrap();
        let second = device.initialize_device(&cfg).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(engine.pipelines_with_prefix("camhub-capture").len(), 1);
    }

    #[test]
    fn test_start_dumps_graph_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let engine = MockEngine::new();
        let cfg = Config {
            show_dot: true,
            ..config(dir.path())
        };
        let graph = CaptureGraph::build(Arc::clone(&engine), &cfg).unwrap();
        graph.start().unwrap();

        assert!(dir.path().join("dot").is_dir());
        assert_eq!(graph.pipeline().state(), PipelineState::Playing);
        assert_eq!(engine.dumps(), ["camhub-capture:camhub-capture-playing"]);
    }
}
