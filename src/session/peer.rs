// SPDX-License-Identifier: MPL-2.0

//! Peer session manager
//!
//! Each peer gets a send pipeline feeding a webrtcbin and, on demand, a
//! receive pipeline that decodes whatever the remote side sends. Offer/answer
//! and ICE candidate exchange belong to an external signaller, which reaches
//! the transport element through [`PeerManager::transport`].
//!
//! ```ignore
//! peers.start_outbound(id, PeerSourceKind::Injection)?;
//! let webrtcbin = peers.transport(id).expect("session just started");
//! // connect the signaller to webrtcbin's offer/answer and ICE signals, then
//! peers.play(id)?;
//! ```
//!
//! The data channel carries a small JSON control protocol. A `sendfile`
//! message announces a file; the following binary messages are written to the
//! transfer directory and the completed file is played back.

use super::consumers::{ConsumerId, ConsumerRegistry};
use super::playback::PlaybackScheduler;
use super::protocol::{ControlMessage, parse_control_message};
use super::recording::{RecordingInfo, RecordingManager, RecordingVariant};
use super::transfer::{PendingFileTransfer, WriteOutcome};
use crate::backends::{
    BusEvent, BusHandler, ChannelEvent, MediaEngine, PeerConnectionState, PipelineState, RemotePad, Subscription,
    TransportEvent,
};
use crate::config::{Config, LoopbackConfig};
use crate::constants::{app_info, peer, timing};
use crate::errors::{GraphError, GraphResult, PeerError};
use crate::media::decode_path_for;
use crate::pipelines::recording::StreamSource;
use crate::pipelines::topology::{BuiltTopology, Topology};
use crate::pipelines::transport::{OutboundPipeline, build_inbound, build_outbound};
use crate::storage::OutputLayout;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

pub type PeerId = u64;

/// Where a peer's outgoing media comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerSourceKind {
    Loopback,
    Injection,
}

impl PeerSourceKind {
    pub fn recording_variant(&self) -> RecordingVariant {
        match self {
            PeerSourceKind::Loopback => RecordingVariant::Loopback,
            PeerSourceKind::Injection => RecordingVariant::Injection,
        }
    }
}

/// Data channels of one peer and its pending file transfer
pub(crate) struct ChannelContext<E: MediaEngine> {
    peer: PeerId,
    engine: Arc<E>,
    transfer_dir: PathBuf,
    playback: Arc<dyn PlaybackScheduler>,
    pending: Mutex<Option<PendingFileTransfer>>,
    channels: Mutex<Vec<(E::Channel, Subscription)>>,
}

impl<E: MediaEngine> ChannelContext<E> {
    fn new(peer: PeerId, engine: Arc<E>, transfer_dir: PathBuf, playback: Arc<dyn PlaybackScheduler>) -> Self {
        Self {
            peer,
            engine,
            transfer_dir,
            playback,
            pending: Mutex::new(None),
            channels: Mutex::new(Vec::new()),
        }
    }

    fn attach(self: &Arc<Self>, channel: E::Channel) {
        let context = Arc::downgrade(self);
        let target = channel.clone();
        let subscription = self.engine.observe_channel(
            &channel,
            Box::new(move |event| {
                if let Some(context) = context.upgrade() {
                    context.handle_event(&target, event);
                }
            }),
        );
        debug!(peer = self.peer, channel = ?channel, "Observing data channel");
        self.channels.lock().push((channel, subscription));
    }

    fn handle_event(&self, channel: &E::Channel, event: ChannelEvent) {
        match event {
            ChannelEvent::Open => {
                info!(peer = self.peer, "Data channel open");
                self.engine.send_text(channel, peer::GREETING);
                self.engine.send_binary(channel, peer::GREETING_PAYLOAD);
            }
            ChannelEvent::Close => info!(peer = self.peer, "Data channel closed"),
            ChannelEvent::Error(message) => warn!(peer = self.peer, %message, "Data channel error"),
            ChannelEvent::Text(text) => self.handle_text(&text),
            ChannelEvent::Binary(data) => self.handle_binary(&data),
        }
    }

    fn handle_text(&self, text: &str) {
        match parse_control_message(text) {
            Ok(ControlMessage::SendFile(offer)) => {
                let mut pending = self.pending.lock();
                // the previous file goes before the new one is created, they may share a path
                if let Some(previous) = pending.take() {
                    warn!(
                        peer = self.peer,
                        file = %previous.name(),
                        written = previous.bytes_written(),
                        "New transfer replaces an incomplete one"
                    );
                    previous.abandon();
                }
                match PendingFileTransfer::begin(&self.transfer_dir, &offer) {
                    Ok(transfer) => *pending = Some(transfer),
                    Err(err) => warn!(peer = self.peer, error = %err, "Rejected file offer"),
                }
            }
            Ok(ControlMessage::Unknown(kind)) => info!(peer = self.peer, %kind, "Ignoring unknown control message"),
            Err(err) => warn!(peer = self.peer, error = %err, message = %text, "Malformed control message"),
        }
    }

    fn handle_binary(&self, data: &[u8]) {
        let completed = {
            let mut pending = self.pending.lock();
            let Some(transfer) = pending.as_mut() else {
                debug!(peer = self.peer, bytes = data.len(), "Binary message without a pending transfer");
                return;
            };
            match transfer.write(data) {
                Ok(WriteOutcome::InProgress { written, remaining }) => {
                    trace!(peer = self.peer, written, remaining, "Transfer progress");
                    None
                }
                Ok(WriteOutcome::Completed(path)) => {
                    pending.take();
                    Some(path)
                }
                Ok(WriteOutcome::Ignored) => None,
                Err(err) => {
                    error!(peer = self.peer, error = %err, "Failed to write transfer, dropping it");
                    if let Some(transfer) = pending.take() {
                        transfer.abandon();
                    }
                    None
                }
            }
        };

        if let Some(path) = completed {
            self.playback.schedule(path);
        }
    }

    pub(crate) fn has_pending_transfer(&self) -> bool {
        self.pending.lock().is_some()
    }

    /// Disconnect and close every channel, dropping any pending transfer
    fn close(&self) {
        let channels = std::mem::take(&mut *self.channels.lock());
        for (channel, subscription) in channels {
            drop(subscription);
            self.engine.close_channel(&channel);
        }
        if let Some(transfer) = self.pending.lock().take() {
            transfer.abandon();
        }
    }
}

type DecoderMap<E> = Arc<Mutex<HashMap<String, BuiltTopology<E>>>>;

struct InboundSide<E: MediaEngine> {
    pipeline: E::Element,
    transport: E::Element,
    subscriptions: Vec<Subscription>,
    decoders: DecoderMap<E>,
}

struct PeerSession<E: MediaEngine> {
    source: PeerSourceKind,
    outbound: OutboundPipeline<E>,
    inbound: Option<InboundSide<E>>,
    channels: Arc<ChannelContext<E>>,
    consumer: Option<ConsumerId>,
    subscriptions: Vec<Subscription>,
    liveness: JoinHandle<()>,
}

pub struct PeerManager<E: MediaEngine> {
    engine: Arc<E>,
    consumers: Arc<ConsumerRegistry<E>>,
    recordings: Arc<RecordingManager<E>>,
    playback: Arc<dyn PlaybackScheduler>,
    runtime: Handle,
    loopback: LoopbackConfig,
    stun_server: String,
    transfer_dir: PathBuf,
    graphical: bool,
    liveness_interval: Duration,
    sessions: Mutex<HashMap<PeerId, PeerSession<E>>>,
}

impl<E: MediaEngine> PeerManager<E> {
    pub fn new(
        engine: Arc<E>,
        consumers: Arc<ConsumerRegistry<E>>,
        recordings: Arc<RecordingManager<E>>,
        playback: Arc<dyn PlaybackScheduler>,
        config: &Config,
        runtime: Handle,
    ) -> Self {
        Self {
            engine,
            consumers,
            recordings,
            playback,
            runtime,
            loopback: config.webrtc.udpsink.clone(),
            stun_server: config.webrtc.stun.clone(),
            transfer_dir: OutputLayout::new(&config.root_dir).transfer_dir(),
            graphical: app_info::has_graphical_session(),
            liveness_interval: timing::LIVENESS_INTERVAL,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Build the send pipeline and data channel for a new peer
    pub fn start_outbound(self: &Arc<Self>, id: PeerId, source: PeerSourceKind) -> Result<(), PeerError> {
        if self.sessions.lock().contains_key(&id) {
            return Err(PeerError::AlreadyExists(id));
        }

        let stream = match source {
            PeerSourceKind::Loopback => StreamSource::Loopback(self.loopback.clone()),
            PeerSourceKind::Injection => StreamSource::injection("", id),
        };
        let outbound = build_outbound(self.engine.as_ref(), id, &stream, &self.stun_server)?;
        let channels = Arc::new(ChannelContext::new(
            id,
            Arc::clone(&self.engine),
            self.transfer_dir.clone(),
            Arc::clone(&self.playback),
        ));

        let subscriptions = match self.wire_outbound(id, &outbound, &channels) {
            Ok(subscriptions) => subscriptions,
            Err(err) => {
                channels.close();
                self.stop_pipeline(&outbound.pipeline);
                return Err(err);
            }
        };

        let consumer = outbound
            .endpoints
            .clone()
            .map(|endpoints| self.consumers.register(endpoints));
        let session = PeerSession {
            source,
            outbound,
            inbound: None,
            channels,
            consumer,
            subscriptions,
            liveness: self.spawn_liveness(id),
        };

        let mut sessions = self.sessions.lock();
        if sessions.contains_key(&id) {
            drop(sessions);
            self.teardown(id, session);
            return Err(PeerError::AlreadyExists(id));
        }
        sessions.insert(id, session);
        info!(peer = id, source = ?source, "Peer session started");
        Ok(())
    }

    fn wire_outbound(
        self: &Arc<Self>,
        id: PeerId,
        outbound: &OutboundPipeline<E>,
        channels: &Arc<ChannelContext<E>>,
    ) -> Result<Vec<Subscription>, PeerError> {
        let engine = self.engine.as_ref();
        let mut subscriptions = vec![
            engine.subscribe_bus(&outbound.pipeline, self.bus_handler(id, "send"))?,
            engine.observe_transport(&outbound.transport, self.transport_handler(id, None)),
        ];

        engine.set_state(&outbound.pipeline, PipelineState::Ready)?;

        let channel = engine.create_data_channel(&outbound.transport, &format!("channel_{}", id))?;
        channels.attach(channel);

        let context = Arc::downgrade(channels);
        subscriptions.push(engine.observe_remote_channels(
            &outbound.transport,
            Box::new(move |channel| {
                if let Some(context) = context.upgrade() {
                    debug!(peer = id, "Remote peer announced a data channel");
                    context.attach(channel);
                }
            }),
        ));
        Ok(subscriptions)
    }

    /// Build the receive pipeline of an existing peer; a no-op if it exists
    pub fn start_inbound(self: &Arc<Self>, id: PeerId) -> Result<(), PeerError> {
        match self.sessions.lock().get(&id) {
            None => return Err(PeerError::NotFound(id)),
            Some(session) if session.inbound.is_some() => {
                debug!(peer = id, "Inbound pipeline already running");
                return Ok(());
            }
            Some(_) => {}
        }

        let inbound = build_inbound(self.engine.as_ref(), id, &self.stun_server)?;
        let decoders: DecoderMap<E> = Arc::new(Mutex::new(HashMap::new()));
        let side = InboundSide {
            subscriptions: Vec::new(),
            decoders: Arc::clone(&decoders),
            pipeline: inbound.pipeline,
            transport: inbound.transport,
        };

        let subscriptions = self
            .engine
            .subscribe_bus(&side.pipeline, self.bus_handler(id, "recv"))
            .map_err(PeerError::from)
            .and_then(|bus| {
                let observer = self.engine.observe_transport(
                    &side.transport,
                    self.transport_handler(id, Some((side.pipeline.clone(), decoders))),
                );
                self.engine.set_state(&side.pipeline, PipelineState::Ready)?;
                Ok(vec![bus, observer])
            });
        let side = match subscriptions {
            Ok(subscriptions) => InboundSide { subscriptions, ..side },
            Err(err) => {
                self.stop_pipeline(&side.pipeline);
                return Err(err);
            }
        };

        let mut sessions = self.sessions.lock();
        match sessions.get_mut(&id) {
            Some(session) if session.inbound.is_none() => {
                session.inbound = Some(side);
                info!(peer = id, "Inbound pipeline ready");
                Ok(())
            }
            existing => {
                let missing = existing.is_none();
                drop(sessions);
                self.stop_pipeline(&side.pipeline);
                if missing { Err(PeerError::NotFound(id)) } else { Ok(()) }
            }
        }
    }

    fn bus_handler(self: &Arc<Self>, id: PeerId, direction: &'static str) -> BusHandler {
        let manager = Arc::downgrade(self);
        let runtime = self.runtime.clone();
        Box::new(move |event| match event {
            BusEvent::Error { source, message, debug: debug_info } => {
                error!(peer = id, direction, source = ?source, %message, debug = ?debug_info, "Peer pipeline error");
                schedule_stop(&runtime, manager.clone(), id);
            }
            BusEvent::Warning { source, message } => {
                warn!(peer = id, direction, source = ?source, %message, "Peer pipeline warning");
            }
            BusEvent::Eos { .. } => debug!(peer = id, direction, "Peer pipeline end-of-stream"),
            BusEvent::StateChanged { .. } => {}
        })
    }

    /// Transport notifications; `decode` is set for the receive side
    fn transport_handler(
        self: &Arc<Self>,
        id: PeerId,
        decode: Option<(E::Element, DecoderMap<E>)>,
    ) -> Box<dyn Fn(TransportEvent<E::Pad>) + Send + Sync> {
        let manager = Arc::downgrade(self);
        let runtime = self.runtime.clone();
        let engine = Arc::clone(&self.engine);
        let graphical = self.graphical;

        Box::new(move |event| match event {
            TransportEvent::ConnectionState(state) => {
                info!(peer = id, state = state.as_str(), "Peer connection state changed");
                if state == PeerConnectionState::Failed {
                    schedule_stop(&runtime, manager.clone(), id);
                }
            }
            TransportEvent::IceGatheringState(state) => {
                info!(peer = id, state = state.as_str(), "ICE gathering state changed");
            }
            TransportEvent::NewTransceiver => debug!(peer = id, "New transceiver, FEC set to ULP-RED"),
            TransportEvent::PadAdded(pad) => match &decode {
                Some((pipeline, decoders)) => {
                    let name = pad.name.clone();
                    match attach_decode_path(engine.as_ref(), pipeline, pad, graphical) {
                        Ok(Some(built)) => {
                            decoders.lock().insert(name, built);
                        }
                        Ok(None) => {}
                        Err(err) => warn!(peer = id, pad = %name, error = %err, "Failed to decode remote stream"),
                    }
                }
                None => debug!(peer = id, pad = %pad.name, "Send transport exposed a pad"),
            },
            TransportEvent::PadRemoved(name) => {
                if let Some((pipeline, decoders)) = &decode {
                    let removed = decoders.lock().remove(&name);
                    if let Some(built) = removed {
                        info!(peer = id, pad = %name, "Remote stream removed");
                        built.release(engine.as_ref(), pipeline);
                    }
                }
            }
        })
    }

    fn spawn_liveness(self: &Arc<Self>, id: PeerId) -> JoinHandle<()> {
        let manager = Arc::downgrade(self);
        let period = self.liveness_interval;
        self.runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else { break };
                if !manager.log_liveness(id) {
                    break;
                }
            }
        })
    }

    fn log_liveness(&self, id: PeerId) -> bool {
        let Some(transport) = self.transport(id) else {
            return false;
        };
        info!(
            peer = id,
            connection = self.engine.connection_state(&transport).as_str(),
            ice_gathering = self.engine.ice_gathering_state(&transport).as_str(),
            "Peer liveness"
        );
        true
    }

    /// The send-side transport element, for the signaller
    pub fn transport(&self, id: PeerId) -> Option<E::Element> {
        self.sessions
            .lock()
            .get(&id)
            .map(|session| session.outbound.transport.clone())
    }

    /// The receive-side transport element, once started
    pub fn inbound_transport(&self, id: PeerId) -> Option<E::Element> {
        self.sessions
            .lock()
            .get(&id)
            .and_then(|session| session.inbound.as_ref())
            .map(|inbound| inbound.transport.clone())
    }

    /// Move a peer's pipelines to playing once negotiation has started
    pub fn play(&self, id: PeerId) -> Result<(), PeerError> {
        let pipelines: Vec<E::Element> = {
            let sessions = self.sessions.lock();
            let session = sessions.get(&id).ok_or(PeerError::NotFound(id))?;
            std::iter::once(session.outbound.pipeline.clone())
                .chain(session.inbound.as_ref().map(|inbound| inbound.pipeline.clone()))
                .collect()
        };
        for pipeline in &pipelines {
            self.engine.set_state(pipeline, PipelineState::Playing)?;
        }
        Ok(())
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn has_session(&self, id: PeerId) -> bool {
        self.sessions.lock().contains_key(&id)
    }

    pub(crate) fn has_pending_transfer(&self, id: PeerId) -> bool {
        self.sessions
            .lock()
            .get(&id)
            .is_some_and(|session| session.channels.has_pending_transfer())
    }

    /// Tear a peer down; `false` for an unknown id
    pub fn stop(&self, id: PeerId) -> bool {
        let Some(session) = self.sessions.lock().remove(&id) else {
            debug!(peer = id, "No session to stop");
            return false;
        };
        self.teardown(id, session);
        true
    }

    fn teardown(&self, id: PeerId, session: PeerSession<E>) {
        let PeerSession {
            outbound,
            inbound,
            channels,
            consumer,
            subscriptions,
            liveness,
            ..
        } = session;

        liveness.abort();
        drop(subscriptions);
        channels.close();
        if let Some(consumer) = consumer {
            self.consumers.unregister(consumer);
        }

        if let Some(inbound) = inbound {
            drop(inbound.subscriptions);
            self.stop_pipeline(&inbound.pipeline);
            inbound.decoders.lock().clear();
        }
        self.stop_pipeline(&outbound.pipeline);
        info!(peer = id, "Peer session stopped");
    }

    fn stop_pipeline(&self, pipeline: &E::Element) {
        if let Err(err) = self.engine.set_state(pipeline, PipelineState::Null) {
            warn!(error = %err, "Failed to stop peer pipeline");
        }
    }

    pub fn stop_all(&self) {
        let ids: Vec<PeerId> = self.sessions.lock().keys().copied().collect();
        for id in ids {
            self.stop(id);
        }
    }

    /// Start an explicit recording sourced the same way as the peer's media
    pub fn start_recording(self: &Arc<Self>, id: PeerId) -> Result<RecordingInfo, PeerError> {
        let source = self
            .sessions
            .lock()
            .get(&id)
            .map(|session| session.source)
            .ok_or(PeerError::NotFound(id))?;
        Ok(self.recordings.start_explicit(source.recording_variant(), None)?)
    }

    pub fn stop_recording(&self) -> bool {
        self.recordings.stop(super::RecordingKind::Explicit)
    }

    pub fn recording_active(&self) -> bool {
        self.recordings.is_recording()
    }

    #[cfg(test)]
    fn with_liveness_interval(mut self, interval: Duration) -> Self {
        self.liveness_interval = interval;
        self
    }
}

fn schedule_stop<E: MediaEngine>(runtime: &Handle, manager: Weak<PeerManager<E>>, id: PeerId) {
    runtime.spawn_blocking(move || {
        if let Some(manager) = manager.upgrade() {
            manager.stop(id);
        }
    });
}

/// Build and link the decode sub-path for one remote pad
fn attach_decode_path<E: MediaEngine>(
    engine: &E,
    pipeline: &E::Element,
    pad: RemotePad<E::Pad>,
    graphical: bool,
) -> GraphResult<Option<BuiltTopology<E>>> {
    let Some(path) = decode_path_for(engine, pad.media.as_deref(), pad.encoding.as_deref(), graphical) else {
        return Ok(None);
    };

    let mut elements = path.elements.into_iter();
    let Some(first) = elements.next() else {
        return Ok(None);
    };
    let mut topology = Topology::new(format!("decode-{}", pad.name));
    topology.chain(first, elements);

    let built = topology.instantiate(engine, pipeline)?;
    if let Err(err) = built.sync_with_parent(engine) {
        built.release(engine, pipeline);
        return Err(err);
    }

    let entry = built.elements()[0].clone();
    let linked = engine
        .static_pad(&entry, "sink")
        .is_some_and(|sink| engine.link_pads(&pad.pad, &sink));
    if !linked {
        built.release(engine, pipeline);
        return Err(GraphError::link(&pad.name, engine.element_name(&entry)));
    }

    info!(pad = %pad.name, kind = %path.kind, rendered = path.rendered, "Decoding remote stream");
    Ok(Some(built))
}
