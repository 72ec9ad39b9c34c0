// SPDX-License-Identifier: MPL-2.0

//! Playback of files received from peers

use crate::backends::{BusEvent, ElementSpec, MediaEngine, PipelineState};
use crate::errors::GraphResult;
use crate::pipelines::Topology;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Runs playback of a completed transfer off the caller's thread
pub trait PlaybackScheduler: Send + Sync {
    fn schedule(&self, path: PathBuf);
}

/// Plays received audio through the default sink, then deletes the file
pub struct EnginePlayback<E: MediaEngine> {
    engine: Arc<E>,
}

impl<E: MediaEngine> EnginePlayback<E> {
    pub fn new(engine: Arc<E>) -> Self {
        Self { engine }
    }
}

impl<E: MediaEngine> PlaybackScheduler for EnginePlayback<E> {
    fn schedule(&self, path: PathBuf) {
        let engine = Arc::clone(&self.engine);
        let spawned = std::thread::Builder::new()
            .name("camhub-playback".into())
            .spawn(move || {
                if let Err(err) = play_file(engine.as_ref(), &path) {
                    error!(file = %path.display(), error = %err, "Playback failed");
                }
            });
        if let Err(err) = spawned {
            error!(error = %err, "Failed to spawn playback thread");
        }
    }
}

/// `filesrc → decodebin → audioconvert → autoaudiosink`, blocking until done
///
/// The file is removed afterwards whether or not playback succeeded.
pub fn play_file<E: MediaEngine>(engine: &E, path: &Path) -> GraphResult<BusEvent> {
    let result = run_pipeline(engine, path);
    if let Err(err) = std::fs::remove_file(path) {
        warn!(file = %path.display(), error = %err, "Failed to remove played file");
    }
    result
}

fn run_pipeline<E: MediaEngine>(engine: &E, path: &Path) -> GraphResult<BusEvent> {
    let pipeline = engine.new_pipeline("playback")?;
    let result = play_in(engine, &pipeline, path);
    if let Err(err) = engine.set_state(&pipeline, PipelineState::Null) {
        warn!(file = %path.display(), error = %err, "Failed to stop playback pipeline");
    }
    result
}

fn play_in<E: MediaEngine>(engine: &E, pipeline: &E::Element, path: &Path) -> GraphResult<BusEvent> {
    let mut topology = Topology::new("playback");
    topology.chain(
        ElementSpec::new("filesrc").prop("location", path.display()),
        [
            ElementSpec::new("decodebin").with_sometimes_pads(),
            ElementSpec::new("audioconvert"),
            ElementSpec::new("autoaudiosink"),
        ],
    );
    topology.instantiate(engine, pipeline)?;

    info!(file = %path.display(), "Playing received file");
    engine.set_state(pipeline, PipelineState::Playing)?;
    let outcome = engine.wait_for_completion(pipeline);

    match &outcome {
        BusEvent::Error { message, .. } => warn!(file = %path.display(), %message, "Playback ended with error"),
        _ => info!(file = %path.display(), "Playback finished"),
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::mock::MockEngine;

    #[test]
    fn test_play_file_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.opus");
        std::fs::write(&path, b"data").unwrap();
        let engine = MockEngine::new();

        let outcome = play_file(engine.as_ref(), &path).unwrap();
        assert!(outcome.is_terminal());
        assert!(!path.exists());

        let pipeline = engine.pipeline("playback").unwrap();
        assert_eq!(
            pipeline.child_factories(),
            ["filesrc", "decodebin", "audioconvert", "autoaudiosink"]
        );
        assert_eq!(pipeline.state(), PipelineState::Null);
    }

    #[test]
    fn test_play_file_reports_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.bin");
        std::fs::write(&path, b"??").unwrap();
        let engine = MockEngine::new();
        engine.set_completion(BusEvent::Error {
            source: Some("decodebin0".into()),
            message: "no decoder".into(),
            debug: None,
        });

        let outcome = play_file(engine.as_ref(), &path).unwrap();
        assert!(matches!(outcome, BusEvent::Error { .. }));
        assert!(!path.exists());
    }

    #[test]
    fn test_refused_start_still_stops_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.opus");
        std::fs::write(&path, b"data").unwrap();
        let engine = MockEngine::new();
        engine.fail_state_change("playback", PipelineState::Playing);

        assert!(play_file(engine.as_ref(), &path).is_err());
        let pipeline = engine.pipeline("playback").unwrap();
        assert_eq!(engine.state_history(&pipeline), [PipelineState::Null]);
        assert!(!path.exists());
    }

    #[test]
    fn test_missing_sink_still_stops_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.opus");
        std::fs::write(&path, b"data").unwrap();
        let engine = MockEngine::new();
        engine.remove_factory("autoaudiosink");

        assert!(play_file(engine.as_ref(), &path).is_err());
        let pipeline = engine.pipeline("playback").unwrap();
        assert_eq!(engine.state_history(&pipeline), [PipelineState::Null]);
        assert!(pipeline.children().is_empty());
    }
}
