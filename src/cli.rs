// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands
//!
//! This module provides command-line functionality for:
//! - Running the capture hub until interrupted
//! - Timed recordings
//! - Reporting installed encoders and decoders
//! - Printing the effective configuration

use camhub::{AppResult, Config};
use camhub::backends::GstEngine;
use camhub::media::encoders::log_available_codecs;
use camhub::pipelines::capture::attach_configured;
use camhub::pipelines::{CaptureDevice, CaptureGraph, SinkBranch};
use camhub::session::{
    ConsumerRegistry, EnginePlayback, PeerManager, RecordingKind, RecordingManager, RecordingVariant,
};
use camhub::trigger::{InotifySource, WatcherHandle, spawn_watcher};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;
use tracing::{debug, error, info, warn};

/// Everything a running hub owns
struct Hub {
    runtime: Runtime,
    graph: Arc<CaptureGraph<GstEngine>>,
    branches: Vec<SinkBranch<GstEngine>>,
    recordings: Arc<RecordingManager<GstEngine>>,
    peers: Option<Arc<PeerManager<GstEngine>>>,
    watcher: Option<WatcherHandle>,
}

impl Hub {
    fn start(config: &Config) -> AppResult<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .thread_name("camhub-rt")
            .enable_all()
            .build()?;

        let engine = Arc::new(GstEngine::new()?);
        log_available_codecs(engine.as_ref());

        let device = CaptureDevice::new(Arc::clone(&engine));
        let graph = device.initialize_device(config)?;

        let consumers = Arc::new(ConsumerRegistry::new(Arc::clone(&engine)));
        let branches = attach_configured(&graph, config, &consumers)?;
        info!(branches = branches.len(), "Sink branches attached");

        let recordings = Arc::new(RecordingManager::new(
            Arc::clone(&engine),
            Arc::clone(&consumers),
            config,
            runtime.handle().clone(),
        ));

        let peers = config.webrtc.enable.then(|| {
            Arc::new(PeerManager::new(
                Arc::clone(&engine),
                Arc::clone(&consumers),
                Arc::clone(&recordings),
                Arc::new(EnginePlayback::new(Arc::clone(&engine))),
                config,
                runtime.handle().clone(),
            ))
        });
        // no signaller ships with the binary; embedders drive PeerManager through the library
        if peers.is_some() {
            debug!(stun = %config.webrtc.stun, "Peer manager ready, no signaller bundled");
        }

        graph.start()?;

        let watcher = if config.hls_onoff.motion_hlssink {
            let marker = graph.layout().motion_marker();
            match InotifySource::open(&marker).and_then(|source| spawn_watcher(source, Arc::clone(&recordings))) {
                Ok(handle) => Some(handle),
                Err(err) => {
                    warn!(path = %marker.display(), error = %err, "Motion trigger unavailable");
                    None
                }
            }
        } else {
            None
        };

        Ok(Self {
            runtime,
            graph,
            branches,
            recordings,
            peers,
            watcher,
        })
    }

    fn shutdown(self) {
        info!("Shutting down");
        if let Some(watcher) = self.watcher {
            watcher.shutdown();
        }
        if let Some(peers) = &self.peers {
            peers.stop_all();
        }
        self.recordings.stop_all();

        for branch in self.branches {
            self.graph.remove_branch(branch);
        }
        if let Err(err) = self.graph.stop() {
            error!(error = %err, "Failed to stop capture graph");
        }
        self.runtime.shutdown_timeout(Duration::from_secs(1));
    }
}

/// Block until Ctrl+C or, if given, until `limit` has elapsed
fn wait_for_interrupt(limit: Option<Duration>) -> Result<(), Box<dyn std::error::Error>> {
    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_flag_clone = stop_flag.clone();
    ctrlc::set_handler(move || {
        stop_flag_clone.store(true, Ordering::SeqCst);
    })?;

    let start = Instant::now();
    while !stop_flag.load(Ordering::SeqCst) {
        if limit.is_some_and(|limit| start.elapsed() >= limit) {
            return Ok(());
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    info!("Interrupted");
    Ok(())
}

/// Run the hub until Ctrl+C
pub fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let hub = Hub::start(&config)?;
    info!(root = %config.root_dir.display(), "camhub running, press Ctrl+C to stop");
    let waited = wait_for_interrupt(None);
    hub.shutdown();
    waited
}

/// Run the hub with one explicit recording of `duration` seconds
pub fn record(
    mut config: Config,
    duration: u64,
    variant: RecordingVariant,
) -> Result<(), Box<dyn std::error::Error>> {
    // make sure something feeds the chosen source
    match variant {
        RecordingVariant::Injection => config.app_sink = true,
        RecordingVariant::Loopback if !config.webrtc.enable => config.app_sink = false,
        RecordingVariant::Loopback => {}
    }

    let hub = Hub::start(&config)?;
    let limit = Duration::from_secs(duration);
    let info = match hub.recordings.start_explicit(variant, Some(limit)) {
        Ok(info) => info,
        Err(err) => {
            hub.shutdown();
            return Err(err.into());
        }
    };
    println!("Recording to {}", info.output_path.display());

    let waited = wait_for_interrupt(Some(limit));
    if hub.recordings.stop(RecordingKind::Explicit) {
        info!("Recording stopped");
    }
    println!("Saved {}", info.output_path.display());
    hub.shutdown();
    waited
}

/// Report which encoders and decoders are installed
pub fn list_encoders() -> Result<(), Box<dyn std::error::Error>> {
    let engine = GstEngine::new()?;
    for (group, factory, available) in camhub::media::encoders::detection::available_codecs(&engine) {
        let mark = if available { "✓" } else { "✗" };
        println!("  {} {:<16} {}", mark, factory, group);
    }
    Ok(())
}

/// Print the effective configuration as JSON
pub fn print_config(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}
