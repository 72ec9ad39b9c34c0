// SPDX-License-Identifier: MPL-2.0

//! Recording session manager
//!
//! Two independent slots, background (motion-triggered) and explicit
//! (commanded), each run at most one session at a time:
//!
//! ```text
//! Idle ──start──► Starting ──built──► Recording ──stop/timer──► Stopping ──► Idle
//! ```
//!
//! A start is a test-and-set on the slot lock, so concurrent starts of the same
//! kind fail with [`RecordingError::Busy`] instead of queueing. Every start
//! bumps the slot generation; a timer only stops the session it was created
//! for.

use super::consumers::{ConsumerId, ConsumerRegistry};
use crate::backends::{BusEvent, MediaEngine, PipelineState, Subscription};
use crate::config::{Config, LoopbackConfig};
use crate::constants::{recording, timing};
use crate::errors::RecordingError;
use crate::pipelines::recording::{StreamSource, build_recording_pipeline};
use crate::storage::OutputLayout;
use chrono::{DateTime, Local};
use parking_lot::Mutex;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordingKind {
    /// Started by the trigger watcher
    Background,
    /// Started by a command or a peer
    Explicit,
}

impl RecordingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordingKind::Background => "background",
            RecordingKind::Explicit => "explicit",
        }
    }

    /// File name prefix
    pub fn prefix(&self) -> &'static str {
        match self {
            RecordingKind::Background => recording::BACKGROUND_PREFIX,
            RecordingKind::Explicit => recording::EXPLICIT_PREFIX,
        }
    }
}

impl fmt::Display for RecordingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a session's streams come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingVariant {
    /// RTP read back from the loopback UDP ports
    Loopback,
    /// appsrc endpoints fed in-process by the fan-out tap
    Injection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingState {
    Idle,
    Starting,
    Recording,
    Stopping,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingInfo {
    pub kind: RecordingKind,
    pub variant: RecordingVariant,
    pub output_path: PathBuf,
    pub started_at: DateTime<Local>,
    pub duration: Option<Duration>,
}

struct ActiveSession<E: MediaEngine> {
    info: RecordingInfo,
    pipeline: E::Element,
    consumer: Option<ConsumerId>,
    bus: Subscription,
    timer: Option<JoinHandle<()>>,
}

struct Slot<E: MediaEngine> {
    state: RecordingState,
    generation: u64,
    stop_requested: bool,
    session: Option<ActiveSession<E>>,
}

impl<E: MediaEngine> Slot<E> {
    fn new() -> Self {
        Self {
            state: RecordingState::Idle,
            generation: 0,
            stop_requested: false,
            session: None,
        }
    }
}

pub struct RecordingManager<E: MediaEngine> {
    engine: Arc<E>,
    consumers: Arc<ConsumerRegistry<E>>,
    layout: OutputLayout,
    loopback: LoopbackConfig,
    runtime: Handle,
    background_variant: RecordingVariant,
    background_duration: Duration,
    finalize_delay: Duration,
    background: Mutex<Slot<E>>,
    explicit: Mutex<Slot<E>>,
}

impl<E: MediaEngine> RecordingManager<E> {
    pub fn new(
        engine: Arc<E>,
        consumers: Arc<ConsumerRegistry<E>>,
        config: &Config,
        runtime: Handle,
    ) -> Self {
        let background_variant = if config.app_sink {
            RecordingVariant::Injection
        } else {
            RecordingVariant::Loopback
        };

        Self {
            engine,
            consumers,
            layout: OutputLayout::new(&config.root_dir),
            loopback: config.webrtc.udpsink.clone(),
            runtime,
            background_variant,
            background_duration: config.background_duration(),
            finalize_delay: timing::EOS_FINALIZE_DELAY,
            background: Mutex::new(Slot::new()),
            explicit: Mutex::new(Slot::new()),
        }
    }

    /// Time given to the muxer between end-of-stream and teardown
    pub fn with_finalize_delay(mut self, delay: Duration) -> Self {
        self.finalize_delay = delay;
        self
    }

    fn slot(&self, kind: RecordingKind) -> &Mutex<Slot<E>> {
        match kind {
            RecordingKind::Background => &self.background,
            RecordingKind::Explicit => &self.explicit,
        }
    }

    pub fn background_variant(&self) -> RecordingVariant {
        self.background_variant
    }

    /// Start a motion-triggered recording of the configured length
    pub fn start_background(self: &Arc<Self>) -> Result<RecordingInfo, RecordingError> {
        self.start(
            RecordingKind::Background,
            self.background_variant,
            Some(self.background_duration),
        )
    }

    /// Start a commanded recording; without a duration it runs until stopped
    pub fn start_explicit(
        self: &Arc<Self>,
        variant: RecordingVariant,
        duration: Option<Duration>,
    ) -> Result<RecordingInfo, RecordingError> {
        self.start(RecordingKind::Explicit, variant, duration)
    }

    fn start(
        self: &Arc<Self>,
        kind: RecordingKind,
        variant: RecordingVariant,
        duration: Option<Duration>,
    ) -> Result<RecordingInfo, RecordingError> {
        let generation = {
            let mut slot = self.slot(kind).lock();
            if slot.state != RecordingState::Idle {
                debug!(%kind, state = ?slot.state, "Recording slot busy");
                return Err(RecordingError::Busy(kind));
            }
            slot.state = RecordingState::Starting;
            slot.stop_requested = false;
            slot.generation += 1;
            slot.generation
        };

        let session = match self.launch(kind, variant, duration, generation) {
            Ok(session) => session,
            Err(err) => {
                error!(%kind, error = %err, "Failed to start recording");
                let mut slot = self.slot(kind).lock();
                slot.state = RecordingState::Idle;
                slot.stop_requested = false;
                return Err(err);
            }
        };

        let info = session.info.clone();
        let stop_now = {
            let mut slot = self.slot(kind).lock();
            slot.state = RecordingState::Recording;
            slot.session = Some(session);
            slot.stop_requested
        };

        info!(
            %kind,
            variant = ?variant,
            output = %info.output_path.display(),
            started = %info.started_at.format(recording::LOG_TIME_FORMAT),
            duration_secs = ?duration.map(|d| d.as_secs()),
            "Recording started"
        );

        if stop_now {
            debug!(%kind, "Applying stop requested during start");
            self.stop_matching(kind, Some(generation));
        }
        Ok(info)
    }

    fn launch(
        self: &Arc<Self>,
        kind: RecordingKind,
        variant: RecordingVariant,
        duration: Option<Duration>,
        generation: u64,
    ) -> Result<ActiveSession<E>, RecordingError> {
        let started_at = Local::now();
        let output_path = self.layout.prepare_recording_path(kind.prefix(), &started_at)?;

        let source = match variant {
            RecordingVariant::Loopback => StreamSource::Loopback(self.loopback.clone()),
            RecordingVariant::Injection => StreamSource::injection("record_", kind),
        };
        let recording = build_recording_pipeline(
            self.engine.as_ref(),
            &format!("record-{}", kind),
            &source,
            &output_path,
        )?;
        let pipeline = recording.pipeline;

        let bus = match self.engine.subscribe_bus(&pipeline, self.bus_handler(kind, generation)) {
            Ok(bus) => bus,
            Err(err) => {
                self.release_pipeline(&pipeline);
                return Err(err.into());
            }
        };

        if let Err(err) = self.engine.set_state(&pipeline, PipelineState::Playing) {
            self.release_pipeline(&pipeline);
            return Err(err.into());
        }

        let consumer = recording
            .endpoints
            .map(|endpoints| self.consumers.register(endpoints));
        let timer = duration.map(|duration| self.spawn_timer(kind, generation, duration));

        Ok(ActiveSession {
            info: RecordingInfo {
                kind,
                variant,
                output_path,
                started_at,
                duration,
            },
            pipeline,
            consumer,
            bus,
            timer,
        })
    }

    fn bus_handler(self: &Arc<Self>, kind: RecordingKind, generation: u64) -> crate::backends::BusHandler {
        let manager = Arc::downgrade(self);
        let runtime = self.runtime.clone();
        Box::new(move |event| match event {
            BusEvent::Error { source, message, .. } => {
                error!(%kind, source = ?source, %message, "Recording pipeline error");
                schedule_stop(&runtime, manager.clone(), kind, generation);
            }
            BusEvent::Warning { source, message } => {
                warn!(%kind, source = ?source, %message, "Recording pipeline warning");
            }
            BusEvent::Eos { .. } => debug!(%kind, "Recording pipeline reached end-of-stream"),
            BusEvent::StateChanged { .. } => {}
        })
    }

    fn spawn_timer(self: &Arc<Self>, kind: RecordingKind, generation: u64, duration: Duration) -> JoinHandle<()> {
        let manager = Arc::downgrade(self);
        let runtime = self.runtime.clone();
        self.runtime.spawn(async move {
            tokio::time::sleep(duration).await;
            debug!(%kind, generation, "Recording timer fired");
            schedule_stop(&runtime, manager, kind, generation);
        })
    }

    fn release_pipeline(&self, pipeline: &E::Element) {
        if let Err(err) = self.engine.set_state(pipeline, PipelineState::Null) {
            warn!(error = %err, "Failed to stop recording pipeline");
        }
    }

    /// Stop the session of `kind`; `false` if the slot was idle or already stopping
    ///
    /// Blocks for the finalize delay on the injection variant.
    pub fn stop(&self, kind: RecordingKind) -> bool {
        self.stop_matching(kind, None)
    }

    fn stop_matching(&self, kind: RecordingKind, generation: Option<u64>) -> bool {
        let session = {
            let mut slot = self.slot(kind).lock();
            if generation.is_some_and(|g| g != slot.generation) {
                debug!(%kind, stale = ?generation, current = slot.generation, "Ignoring stale stop");
                return false;
            }
            match slot.state {
                RecordingState::Idle | RecordingState::Stopping => return false,
                RecordingState::Starting => {
                    slot.stop_requested = true;
                    return true;
                }
                RecordingState::Recording => {}
            }
            slot.state = RecordingState::Stopping;
            slot.session.take()
        };

        if let Some(session) = session {
            self.teardown(session);
        }

        let mut slot = self.slot(kind).lock();
        slot.state = RecordingState::Idle;
        slot.stop_requested = false;
        true
    }

    fn teardown(&self, session: ActiveSession<E>) {
        let ActiveSession {
            info,
            pipeline,
            consumer,
            bus,
            timer,
        } = session;

        if let Some(timer) = timer {
            timer.abort();
        }
        if let Some(consumer) = consumer {
            self.consumers.unregister(consumer);
        }

        if info.variant == RecordingVariant::Injection {
            if !self.engine.send_eos(&pipeline) {
                warn!(kind = %info.kind, "Recording pipeline rejected end-of-stream");
            }
            std::thread::sleep(self.finalize_delay);
        }
        self.release_pipeline(&pipeline);
        drop(bus);

        info!(
            kind = %info.kind,
            output = %info.output_path.display(),
            elapsed_secs = (Local::now() - info.started_at).num_seconds(),
            "Recording stopped"
        );
    }

    pub fn state(&self, kind: RecordingKind) -> RecordingState {
        self.slot(kind).lock().state
    }

    pub fn is_active(&self, kind: RecordingKind) -> bool {
        self.state(kind) != RecordingState::Idle
    }

    /// Whether an explicit recording is running
    pub fn is_recording(&self) -> bool {
        self.is_active(RecordingKind::Explicit)
    }

    pub fn current(&self, kind: RecordingKind) -> Option<RecordingInfo> {
        self.slot(kind)
            .lock()
            .session
            .as_ref()
            .map(|session| session.info.clone())
    }

    pub fn stop_all(&self) {
        for kind in [RecordingKind::Explicit, RecordingKind::Background] {
            if self.stop(kind) {
                debug!(%kind, "Stopped at shutdown");
            }
        }
    }
}

fn schedule_stop<E: MediaEngine>(
    runtime: &Handle,
    manager: Weak<RecordingManager<E>>,
    kind: RecordingKind,
    generation: u64,
) {
    runtime.spawn_blocking(move || {
        if let Some(manager) = manager.upgrade() {
            manager.stop_matching(kind, Some(generation));
        }
    });
}
