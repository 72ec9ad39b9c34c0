// SPDX-License-Identifier: MPL-2.0

//! In-memory engine for unit tests
//!
//! Elements are plain records. Every structural call is logged so tests can
//! assert on topology, and callbacks are stored so tests can fire events.

use super::types::*;
use super::{BusHandler, ChannelHandler, MediaEngine};
use crate::errors::{GraphError, GraphResult};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

pub struct MockNode {
    pub id: u64,
    pub factory: String,
    pub name: String,
    pub properties: Vec<(String, String)>,
    pub state: Mutex<PipelineState>,
    pub children: Mutex<Vec<MockElement>>,
    pub pushed: Mutex<Vec<MockBuffer>>,
    pub eos_sent: AtomicBool,
}

#[derive(Clone)]
pub struct MockElement(pub Arc<MockNode>);

impl MockElement {
    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn factory(&self) -> &str {
        &self.0.factory
    }

    pub fn property(&self, key: &str) -> Option<String> {
        self.0
            .properties
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    pub fn state(&self) -> PipelineState {
        *self.0.state.lock()
    }

    pub fn children(&self) -> Vec<MockElement> {
        self.0.children.lock().clone()
    }

    pub fn child_factories(&self) -> Vec<String> {
        self.children()
            .iter()
            .map(|c| c.factory().to_string())
            .collect()
    }

    pub fn find_child(&self, name: &str) -> Option<MockElement> {
        self.children().into_iter().find(|c| c.name() == name)
    }

    pub fn pushed(&self) -> Vec<MockBuffer> {
        self.0.pushed.lock().clone()
    }

    pub fn eos_sent(&self) -> bool {
        self.0.eos_sent.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for MockElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}({})", self.0.factory, self.0.id, self.0.name)
    }
}

impl PartialEq for MockElement {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockPad {
    pub id: u64,
    pub name: String,
    pub owner: u64,
    pub owner_name: String,
}

pub type MockBuffer = Vec<u8>;

pub struct MockChannelInner {
    pub label: String,
    pub texts: Mutex<Vec<String>>,
    pub binaries: Mutex<Vec<Vec<u8>>>,
    pub handlers: Mutex<Vec<(u64, Arc<dyn Fn(ChannelEvent) + Send + Sync>)>>,
    pub closed: AtomicBool,
}

#[derive(Clone)]
pub struct MockChannel(pub Arc<MockChannelInner>);

impl MockChannel {
    fn new(label: &str) -> Self {
        Self(Arc::new(MockChannelInner {
            label: label.to_string(),
            texts: Mutex::new(Vec::new()),
            binaries: Mutex::new(Vec::new()),
            handlers: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }))
    }

    pub fn label(&self) -> &str {
        &self.0.label
    }

    /// Deliver an event to every observer of this channel
    pub fn emit(&self, event: ChannelEvent) {
        let handlers: Vec<_> = self.0.handlers.lock().iter().map(|(_, h)| Arc::clone(h)).collect();
        for handler in handlers {
            handler(event.clone());
        }
    }

    pub fn observer_count(&self) -> usize {
        self.0.handlers.lock().len()
    }

    pub fn texts(&self) -> Vec<String> {
        self.0.texts.lock().clone()
    }

    pub fn binaries(&self) -> Vec<Vec<u8>> {
        self.0.binaries.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.0.closed.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for MockChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MockChannel({})", self.0.label)
    }
}

type Shared<T> = Arc<dyn Fn(T) + Send + Sync>;

#[derive(Default)]
pub struct MockEngine {
    next_id: AtomicU64,
    missing: Mutex<HashSet<String>>,
    failing_links: Mutex<HashSet<(String, String)>>,
    failing_pad_targets: Mutex<HashSet<String>>,
    created: Mutex<Vec<MockElement>>,
    pipelines: Mutex<Vec<MockElement>>,
    links: Mutex<Vec<(u64, u64)>>,
    deferred_links: Mutex<Vec<(u64, u64)>>,
    pad_links: Mutex<Vec<(MockPad, MockPad)>>,
    requested: Mutex<Vec<MockPad>>,
    released: Mutex<Vec<MockPad>>,
    removed: Mutex<Vec<u64>>,
    bus: Arc<Mutex<HashMap<u64, Shared<BusEvent>>>>,
    transports: Arc<Mutex<HashMap<u64, Shared<TransportEvent<MockPad>>>>>,
    remote_channels: Arc<Mutex<HashMap<u64, Shared<MockChannel>>>>,
    channels: Mutex<Vec<MockChannel>>,
    taps: Mutex<HashMap<u64, Shared<MockBuffer>>>,
    connection: Mutex<Option<PeerConnectionState>>,
    connection_queries: AtomicUsize,
    failing_states: Mutex<Vec<(String, PipelineState)>>,
    state_changes: Mutex<Vec<(u64, PipelineState)>>,
    completion: Mutex<Option<BusEvent>>,
    dumps: Mutex<Vec<String>>,
}

impl MockEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn next(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Make a factory unavailable
    pub fn remove_factory(&self, factory: &str) {
        self.missing.lock().insert(factory.to_string());
    }

    /// Make element links between two factories fail
    pub fn fail_links(&self, src_factory: &str, sink_factory: &str) {
        self.failing_links
            .lock()
            .insert((src_factory.to_string(), sink_factory.to_string()));
    }

    /// Make pad links into the named element fail
    pub fn fail_pad_links_into(&self, element_name: &str) {
        self.failing_pad_targets.lock().insert(element_name.to_string());
    }

    pub fn set_connection_state(&self, state: PeerConnectionState) {
        *self.connection.lock() = Some(state);
    }

    /// Make `set_state(element named name, state)` fail
    pub fn fail_state_change(&self, name: &str, state: PipelineState) {
        self.failing_states.lock().push((name.to_string(), state));
    }

    /// Successful state changes of one element, in order
    pub fn state_history(&self, element: &MockElement) -> Vec<PipelineState> {
        self.state_changes
            .lock()
            .iter()
            .filter(|(id, _)| *id == element.id())
            .map(|(_, state)| *state)
            .collect()
    }

    /// How often `connection_state` has been called
    pub fn connection_queries(&self) -> usize {
        self.connection_queries.load(Ordering::SeqCst)
    }

    pub fn set_completion(&self, event: BusEvent) {
        *self.completion.lock() = Some(event);
    }

    pub fn created(&self) -> Vec<MockElement> {
        self.created.lock().clone()
    }

    pub fn created_by_factory(&self, factory: &str) -> Vec<MockElement> {
        self.created()
            .into_iter()
            .filter(|e| e.factory() == factory)
            .collect()
    }

    pub fn pipelines(&self) -> Vec<MockElement> {
        self.pipelines.lock().clone()
    }

    pub fn pipeline(&self, name: &str) -> Option<MockElement> {
        self.pipelines().into_iter().find(|p| p.name() == name)
    }

    pub fn pipelines_with_prefix(&self, prefix: &str) -> Vec<MockElement> {
        self.pipelines()
            .into_iter()
            .filter(|p| p.name().starts_with(prefix))
            .collect()
    }

    pub fn element(&self, name: &str) -> Option<MockElement> {
        self.created().into_iter().rev().find(|e| e.name() == name)
    }

    pub fn is_linked(&self, src: &MockElement, sink: &MockElement) -> bool {
        self.links.lock().contains(&(src.id(), sink.id()))
    }

    pub fn is_deferred_link(&self, src: &MockElement, sink: &MockElement) -> bool {
        self.deferred_links.lock().contains(&(src.id(), sink.id()))
    }

    pub fn pad_links_into(&self, element: &MockElement) -> usize {
        self.pad_links
            .lock()
            .iter()
            .filter(|(_, sink)| sink.owner == element.id())
            .count()
    }

    pub fn requested_pads(&self, element: &MockElement) -> usize {
        self.requested
            .lock()
            .iter()
            .filter(|p| p.owner == element.id())
            .count()
    }

    pub fn released_pads(&self, element: &MockElement) -> usize {
        self.released
            .lock()
            .iter()
            .filter(|p| p.owner == element.id())
            .count()
    }

    pub fn was_removed(&self, element: &MockElement) -> bool {
        self.removed.lock().contains(&element.id())
    }

    pub fn has_bus_subscription(&self, pipeline: &MockElement) -> bool {
        self.bus.lock().contains_key(&pipeline.id())
    }

    pub fn post_bus(&self, pipeline: &MockElement, event: BusEvent) {
        let handler = self.bus.lock().get(&pipeline.id()).cloned();
        if let Some(handler) = handler {
            handler(event);
        }
    }

    pub fn has_transport_observer(&self, transport: &MockElement) -> bool {
        self.transports.lock().contains_key(&transport.id())
    }

    pub fn emit_transport(&self, transport: &MockElement, event: TransportEvent<MockPad>) {
        let handler = self.transports.lock().get(&transport.id()).cloned();
        if let Some(handler) = handler {
            handler(event);
        }
    }

    /// Simulate the remote peer opening a data channel
    pub fn announce_remote_channel(&self, transport: &MockElement, label: &str) -> MockChannel {
        let channel = MockChannel::new(label);
        self.channels.lock().push(channel.clone());
        let handler = self.remote_channels.lock().get(&transport.id()).cloned();
        if let Some(handler) = handler {
            handler(channel.clone());
        }
        channel
    }

    pub fn channels(&self) -> Vec<MockChannel> {
        self.channels.lock().clone()
    }

    pub fn channel(&self, label: &str) -> Option<MockChannel> {
        self.channels().into_iter().find(|c| c.label() == label)
    }

    /// Feed a buffer into an appsink as if the capture graph produced it
    pub fn emit_sample(&self, appsink: &MockElement, buffer: MockBuffer) {
        let tap = self.taps.lock().get(&appsink.id()).cloned();
        if let Some(tap) = tap {
            tap(buffer);
        }
    }

    /// A pad as the remote side of a transport would announce it
    pub fn remote_pad(&self, name: &str, media: Option<&str>, encoding: Option<&str>) -> RemotePad<MockPad> {
        RemotePad {
            pad: MockPad {
                id: self.next(),
                name: name.to_string(),
                owner: 0,
                owner_name: "remote".to_string(),
            },
            name: name.to_string(),
            media: media.map(str::to_string),
            encoding: encoding.map(str::to_string),
        }
    }

    pub fn dumps(&self) -> Vec<String> {
        self.dumps.lock().clone()
    }

    fn new_node(&self, factory: &str, name: Option<&str>, properties: Vec<(String, String)>) -> MockElement {
        let id = self.next();
        let element = MockElement(Arc::new(MockNode {
            id,
            factory: factory.to_string(),
            name: name
                .map(str::to_string)
                .unwrap_or_else(|| format!("{}{}", factory, id)),
            properties,
            state: Mutex::new(PipelineState::Null),
            children: Mutex::new(Vec::new()),
            pushed: Mutex::new(Vec::new()),
            eos_sent: AtomicBool::new(false),
        }));
        self.created.lock().push(element.clone());
        element
    }

    fn pad(&self, element: &MockElement, name: &str) -> MockPad {
        MockPad {
            id: self.next(),
            name: name.to_string(),
            owner: element.id(),
            owner_name: element.name().to_string(),
        }
    }
}

impl MediaEngine for MockEngine {
    type Element = MockElement;
    type Pad = MockPad;
    type Buffer = MockBuffer;
    type Channel = MockChannel;

    fn has_factory(&self, factory: &str) -> bool {
        !self.missing.lock().contains(factory)
    }

    fn make_element(&self, spec: &ElementSpec) -> GraphResult<MockElement> {
        if !self.has_factory(&spec.factory) {
            return Err(GraphError::construction(&spec.factory, "factory not installed"));
        }
        Ok(self.new_node(&spec.factory, spec.name.as_deref(), spec.properties.clone()))
    }

    fn new_pipeline(&self, name: &str) -> GraphResult<MockElement> {
        let pipeline = self.new_node("pipeline", Some(name), Vec::new());
        self.pipelines.lock().push(pipeline.clone());
        Ok(pipeline)
    }

    fn element_name(&self, element: &MockElement) -> String {
        element.name().to_string()
    }

    fn add(&self, container: &MockElement, element: &MockElement) -> GraphResult<()> {
        container.0.children.lock().push(element.clone());
        Ok(())
    }

    fn remove(&self, container: &MockElement, element: &MockElement) -> GraphResult<()> {
        container.0.children.lock().retain(|c| c != element);
        self.removed.lock().push(element.id());
        Ok(())
    }

    fn link(&self, src: &MockElement, sink: &MockElement) -> bool {
        let key = (src.factory().to_string(), sink.factory().to_string());
        if self.failing_links.lock().contains(&key) {
            return false;
        }
        self.links.lock().push((src.id(), sink.id()));
        true
    }

    fn link_on_pad_added(&self, src: &MockElement, sink: &MockElement) {
        self.deferred_links.lock().push((src.id(), sink.id()));
    }

    fn request_pad(&self, element: &MockElement, template: &str) -> Option<MockPad> {
        let count = self.requested_pads(element);
        let name = template.replace("%u", &count.to_string());
        let pad = self.pad(element, &name);
        self.requested.lock().push(pad.clone());
        Some(pad)
    }

    fn static_pad(&self, element: &MockElement, name: &str) -> Option<MockPad> {
        Some(self.pad(element, name))
    }

    fn link_pads(&self, src: &MockPad, sink: &MockPad) -> bool {
        if self.failing_pad_targets.lock().contains(&sink.owner_name) {
            return false;
        }
        self.pad_links.lock().push((src.clone(), sink.clone()));
        true
    }

    fn unlink_pads(&self, src: &MockPad, sink: &MockPad) {
        self.pad_links
            .lock()
            .retain(|(s, k)| !(s.id == src.id && k.id == sink.id));
    }

    fn release_pad(&self, _element: &MockElement, pad: &MockPad) {
        self.released.lock().push(pad.clone());
    }

    fn set_state(&self, element: &MockElement, state: PipelineState) -> GraphResult<()> {
        let refused = self
            .failing_states
            .lock()
            .iter()
            .any(|(name, s)| name == element.name() && *s == state);
        if refused {
            return Err(GraphError::StateChange {
                element: element.name().to_string(),
                reason: format!("{:?} refused", state),
            });
        }
        *element.0.state.lock() = state;
        self.state_changes.lock().push((element.id(), state));
        Ok(())
    }

    fn sync_state_with_parent(&self, _element: &MockElement) -> GraphResult<()> {
        Ok(())
    }

    fn send_eos(&self, element: &MockElement) -> bool {
        element.0.eos_sent.store(true, Ordering::SeqCst);
        true
    }

    fn subscribe_bus(&self, pipeline: &MockElement, handler: BusHandler) -> GraphResult<Subscription> {
        let id = pipeline.id();
        self.bus.lock().insert(id, Arc::from(handler));
        let bus = Arc::clone(&self.bus);
        Ok(Subscription::new(move || {
            bus.lock().remove(&id);
        }))
    }

    fn wait_for_completion(&self, _pipeline: &MockElement) -> BusEvent {
        self.completion
            .lock()
            .clone()
            .unwrap_or(BusEvent::Eos { source: None })
    }

    fn dump_graph(&self, pipeline: &MockElement, _dir: &Path, name: &str) -> std::io::Result<()> {
        self.dumps.lock().push(format!("{}:{}", pipeline.name(), name));
        Ok(())
    }

    fn install_sample_tap(
        &self,
        appsink: &MockElement,
        handler: Box<dyn Fn(MockBuffer) + Send + Sync>,
    ) -> GraphResult<()> {
        self.taps.lock().insert(appsink.id(), Arc::from(handler));
        Ok(())
    }

    fn push_buffer(&self, appsrc: &MockElement, buffer: MockBuffer) -> GraphResult<()> {
        appsrc.0.pushed.lock().push(buffer);
        Ok(())
    }

    fn create_data_channel(&self, _transport: &MockElement, label: &str) -> GraphResult<MockChannel> {
        let channel = MockChannel::new(label);
        self.channels.lock().push(channel.clone());
        Ok(channel)
    }

    fn observe_channel(&self, channel: &MockChannel, handler: ChannelHandler) -> Subscription {
        let id = self.next();
        channel.0.handlers.lock().push((id, Arc::from(handler)));
        let channel = channel.clone();
        Subscription::new(move || channel.0.handlers.lock().retain(|(h, _)| *h != id))
    }

    fn observe_remote_channels(
        &self,
        transport: &MockElement,
        handler: Box<dyn Fn(MockChannel) + Send + Sync>,
    ) -> Subscription {
        let id = transport.id();
        self.remote_channels.lock().insert(id, Arc::from(handler));
        let observers = Arc::clone(&self.remote_channels);
        Subscription::new(move || {
            observers.lock().remove(&id);
        })
    }

    fn send_text(&self, channel: &MockChannel, text: &str) {
        channel.0.texts.lock().push(text.to_string());
    }

    fn send_binary(&self, channel: &MockChannel, data: &[u8]) {
        channel.0.binaries.lock().push(data.to_vec());
    }

    fn close_channel(&self, channel: &MockChannel) {
        channel.0.closed.store(true, Ordering::SeqCst);
    }

    fn observe_transport(
        &self,
        transport: &MockElement,
        handler: Box<dyn Fn(TransportEvent<MockPad>) + Send + Sync>,
    ) -> Subscription {
        let id = transport.id();
        self.transports.lock().insert(id, Arc::from(handler));
        let observers = Arc::clone(&self.transports);
        Subscription::new(move || {
            observers.lock().remove(&id);
        })
    }

    fn connection_state(&self, _transport: &MockElement) -> PeerConnectionState {
        self.connection_queries.fetch_add(1, Ordering::SeqCst);
        self.connection.lock().unwrap_or(PeerConnectionState::New)
    }

    fn ice_gathering_state(&self, _transport: &MockElement) -> IceGatheringState {
        IceGatheringState::New
    }
}
