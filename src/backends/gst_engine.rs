// SPDX-License-Identifier: MPL-2.0

//! GStreamer implementation of [`MediaEngine`]
//!
//! Bus watches are attached to the default GLib main context, which is
//! iterated by a single dispatch thread owned by the engine. Data channel and
//! transport callbacks arrive on webrtcbin's own threads.

use super::timestamps::TimeSegment;
use super::types::*;
use super::{BusHandler, ChannelHandler, MediaEngine};
use crate::errors::{GraphError, GraphResult};
use gstreamer as gst;
use gstreamer::glib;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_webrtc as gst_webrtc;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Media engine backed by GStreamer
pub struct GstEngine {
    main_loop: glib::MainLoop,
}

impl GstEngine {
    /// Initialize GStreamer and start the bus dispatch thread
    pub fn new() -> GraphResult<Self> {
        gst::init().map_err(|e| GraphError::construction("gstreamer", e))?;

        let main_loop = glib::MainLoop::new(None, false);
        let dispatch_loop = main_loop.clone();
        std::thread::Builder::new()
            .name("gst-bus-dispatch".into())
            .spawn(move || dispatch_loop.run())?;

        debug!(version = %gst::version_string(), "GStreamer engine ready");
        Ok(Self { main_loop })
    }

    fn bin<'a>(element: &'a gst::Element) -> GraphResult<&'a gst::Bin> {
        element
            .downcast_ref::<gst::Bin>()
            .ok_or_else(|| GraphError::construction(element.name().as_str(), "element is not a bin"))
    }

    fn apply_property(element: &gst::Element, label: &str, key: &str, value: &str) {
        let Some(pspec) = element.find_property(key) else {
            warn!(element = %label, property = %key, "Element has no such property, skipping");
            return;
        };
        match glib::Value::deserialize(value, pspec.value_type()) {
            Ok(parsed) => element.set_property_from_value(key, &parsed),
            Err(err) => warn!(
                element = %label,
                property = %key,
                value = %value,
                error = %err,
                "Could not parse property value"
            ),
        }
    }
}

impl Drop for GstEngine {
    fn drop(&mut self) {
        self.main_loop.quit();
    }
}

fn to_gst_state(state: PipelineState) -> gst::State {
    match state {
        PipelineState::Null => gst::State::Null,
        PipelineState::Ready => gst::State::Ready,
        PipelineState::Paused => gst::State::Paused,
        PipelineState::Playing => gst::State::Playing,
    }
}

fn from_gst_state(state: gst::State) -> PipelineState {
    match state {
        gst::State::Ready => PipelineState::Ready,
        gst::State::Paused => PipelineState::Paused,
        gst::State::Playing => PipelineState::Playing,
        _ => PipelineState::Null,
    }
}

fn bus_event(msg: &gst::Message) -> Option<BusEvent> {
    use gst::MessageView;

    let source = msg.src().map(|s| s.path_string().to_string());
    match msg.view() {
        MessageView::Eos(_) => Some(BusEvent::Eos { source }),
        MessageView::Error(err) => Some(BusEvent::Error {
            source,
            message: err.error().to_string(),
            debug: err.debug().map(|d| d.to_string()),
        }),
        MessageView::Warning(w) => Some(BusEvent::Warning {
            source,
            message: w.error().to_string(),
        }),
        MessageView::StateChanged(change) => Some(BusEvent::StateChanged {
            source,
            old: from_gst_state(change.old()),
            new: from_gst_state(change.current()),
        }),
        _ => None,
    }
}

fn time_segment(segment: &gst::FormattedSegment<gst::ClockTime>) -> TimeSegment {
    TimeSegment {
        start: segment.start().map(|t| t.nseconds()).unwrap_or(0),
        stop: segment.stop().map(|t| t.nseconds()),
        base: segment.base().map(|t| t.nseconds()).unwrap_or(0),
        rate: segment.rate(),
    }
}

fn peer_connection_state(transport: &gst::Element) -> PeerConnectionState {
    use gst_webrtc::WebRTCPeerConnectionState as S;

    if !transport.has_property("connection-state") {
        return PeerConnectionState::Unknown;
    }
    match transport.property::<S>("connection-state") {
        S::New => PeerConnectionState::New,
        S::Connecting => PeerConnectionState::Connecting,
        S::Connected => PeerConnectionState::Connected,
        S::Disconnected => PeerConnectionState::Disconnected,
        S::Failed => PeerConnectionState::Failed,
        S::Closed => PeerConnectionState::Closed,
        _ => PeerConnectionState::Unknown,
    }
}

fn gathering_state(transport: &gst::Element) -> IceGatheringState {
    use gst_webrtc::WebRTCICEGatheringState as S;

    if !transport.has_property("ice-gathering-state") {
        return IceGatheringState::Unknown;
    }
    match transport.property::<S>("ice-gathering-state") {
        S::New => IceGatheringState::New,
        S::Gathering => IceGatheringState::Gathering,
        S::Complete => IceGatheringState::Complete,
        _ => IceGatheringState::Unknown,
    }
}

fn remote_pad(pad: &gst::Pad) -> RemotePad<gst::Pad> {
    let caps = pad.current_caps().unwrap_or_else(|| pad.query_caps(None));
    let structure = caps.structure(0);
    let field = |name: &str| structure.and_then(|s| s.get::<String>(name).ok());

    RemotePad {
        pad: pad.clone(),
        name: pad.name().to_string(),
        media: field("media"),
        encoding: field("encoding-name"),
    }
}

impl MediaEngine for GstEngine {
    type Element = gst::Element;
    type Pad = gst::Pad;
    type Buffer = gst::Buffer;
    type Channel = gst_webrtc::WebRTCDataChannel;

    fn has_factory(&self, factory: &str) -> bool {
        gst::ElementFactory::find(factory).is_some()
    }

    fn make_element(&self, spec: &ElementSpec) -> GraphResult<gst::Element> {
        let mut builder = gst::ElementFactory::make(&spec.factory);
        if let Some(name) = &spec.name {
            builder = builder.name(name.as_str());
        }
        let element = builder
            .build()
            .map_err(|e| GraphError::construction(&spec.factory, e))?;

        for (key, value) in &spec.properties {
            Self::apply_property(&element, spec.label(), key, value);
        }
        Ok(element)
    }

    fn new_pipeline(&self, name: &str) -> GraphResult<gst::Element> {
        Ok(gst::Pipeline::with_name(name).upcast())
    }

    fn element_name(&self, element: &gst::Element) -> String {
        element.name().to_string()
    }

    fn add(&self, container: &gst::Element, element: &gst::Element) -> GraphResult<()> {
        Self::bin(container)?
            .add(element)
            .map_err(|e| GraphError::construction(element.name().as_str(), e))
    }

    fn remove(&self, container: &gst::Element, element: &gst::Element) -> GraphResult<()> {
        Self::bin(container)?
            .remove(element)
            .map_err(|e| GraphError::construction(element.name().as_str(), e))
    }

    fn link(&self, src: &gst::Element, sink: &gst::Element) -> bool {
        match src.link(sink) {
            Ok(()) => true,
            Err(err) => {
                debug!(src = %src.name(), sink = %sink.name(), error = %err, "Element link failed");
                false
            }
        }
    }

    fn link_on_pad_added(&self, src: &gst::Element, sink: &gst::Element) {
        let sink = sink.clone();
        src.connect_pad_added(move |src, pad| {
            let Some(sink_pad) = sink.static_pad("sink") else {
                return;
            };
            if sink_pad.is_linked() {
                return;
            }
            if let Err(err) = pad.link(&sink_pad) {
                warn!(src = %src.name(), sink = %sink.name(), error = ?err, "Dynamic pad link failed");
            }
        });
    }

    fn request_pad(&self, element: &gst::Element, template: &str) -> Option<gst::Pad> {
        element.request_pad_simple(template)
    }

    fn static_pad(&self, element: &gst::Element, name: &str) -> Option<gst::Pad> {
        element.static_pad(name)
    }

    fn link_pads(&self, src: &gst::Pad, sink: &gst::Pad) -> bool {
        match src.link(sink) {
            Ok(_) => true,
            Err(err) => {
                debug!(src = %src.name(), sink = %sink.name(), error = ?err, "Pad link failed");
                false
            }
        }
    }

    fn unlink_pads(&self, src: &gst::Pad, sink: &gst::Pad) {
        if src.unlink(sink).is_err() {
            debug!(src = %src.name(), sink = %sink.name(), "Pads were not linked");
        }
    }

    fn release_pad(&self, element: &gst::Element, pad: &gst::Pad) {
        element.release_request_pad(pad);
    }

    fn set_state(&self, element: &gst::Element, state: PipelineState) -> GraphResult<()> {
        element
            .set_state(to_gst_state(state))
            .map(|_| ())
            .map_err(|e| GraphError::StateChange {
                element: element.name().to_string(),
                reason: e.to_string(),
            })
    }

    fn sync_state_with_parent(&self, element: &gst::Element) -> GraphResult<()> {
        element
            .sync_state_with_parent()
            .map_err(|e| GraphError::StateChange {
                element: element.name().to_string(),
                reason: e.to_string(),
            })
    }

    fn send_eos(&self, element: &gst::Element) -> bool {
        element.send_event(gst::event::Eos::new())
    }

    fn subscribe_bus(&self, pipeline: &gst::Element, handler: BusHandler) -> GraphResult<Subscription> {
        let bus = pipeline
            .bus()
            .ok_or_else(|| GraphError::construction(pipeline.name().as_str(), "element has no bus"))?;

        let guard = bus
            .add_watch(move |_, msg| {
                if let Some(event) = bus_event(msg) {
                    handler(event);
                }
                glib::ControlFlow::Continue
            })
            .map_err(|e| GraphError::construction("bus watch", e))?;

        Ok(Subscription::new(move || drop(guard)))
    }

    fn wait_for_completion(&self, pipeline: &gst::Element) -> BusEvent {
        let Some(bus) = pipeline.bus() else {
            return BusEvent::Error {
                source: Some(pipeline.name().to_string()),
                message: "pipeline has no bus".to_string(),
                debug: None,
            };
        };

        let msg = bus.timed_pop_filtered(
            gst::ClockTime::NONE,
            &[gst::MessageType::Eos, gst::MessageType::Error],
        );
        match msg.as_ref().and_then(bus_event) {
            Some(event) => event,
            None => BusEvent::Error {
                source: Some(pipeline.name().to_string()),
                message: "bus flushed before completion".to_string(),
                debug: None,
            },
        }
    }

    fn dump_graph(&self, pipeline: &gst::Element, dir: &Path, name: &str) -> std::io::Result<()> {
        let bin = Self::bin(pipeline).map_err(|e| std::io::Error::other(e.to_string()))?;
        let dot = bin.debug_to_dot_data(gst::DebugGraphDetails::all());
        std::fs::create_dir_all(dir)?;
        std::fs::write(dir.join(format!("{}.dot", name)), dot.as_str())
    }

    fn install_sample_tap(
        &self,
        appsink: &gst::Element,
        handler: Box<dyn Fn(gst::Buffer) + Send + Sync>,
    ) -> GraphResult<()> {
        let appsink = appsink
            .clone()
            .downcast::<gst_app::AppSink>()
            .map_err(|e| GraphError::construction(e.name().as_str(), "element is not an appsink"))?;

        appsink.set_callbacks(
            gst_app::AppSinkCallbacks::builder()
                .new_sample(move |sink| {
                    let sample = sink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                    let Some(buffer) = sample.buffer() else {
                        return Ok(gst::FlowSuccess::Ok);
                    };
                    let segment = sample
                        .segment()
                        .and_then(|s| s.downcast_ref::<gst::ClockTime>())
                        .map(time_segment)
                        .unwrap_or_default();

                    let running = |ts: Option<gst::ClockTime>| {
                        ts.and_then(|t| segment.to_running_time(t.nseconds()))
                            .map(gst::ClockTime::from_nseconds)
                    };

                    let mut copy = buffer.copy();
                    {
                        let copy = copy.make_mut();
                        copy.set_pts(running(buffer.pts()));
                        copy.set_dts(running(buffer.dts()));
                    }
                    handler(copy);
                    Ok(gst::FlowSuccess::Ok)
                })
                .build(),
        );
        Ok(())
    }

    fn push_buffer(&self, appsrc: &gst::Element, buffer: gst::Buffer) -> GraphResult<()> {
        let src = appsrc
            .downcast_ref::<gst_app::AppSrc>()
            .ok_or_else(|| GraphError::construction(appsrc.name().as_str(), "element is not an appsrc"))?;

        src.push_buffer(buffer)
            .map(|_| ())
            .map_err(|flow| GraphError::Flow {
                element: appsrc.name().to_string(),
                reason: format!("{:?}", flow),
            })
    }

    fn create_data_channel(
        &self,
        transport: &gst::Element,
        label: &str,
    ) -> GraphResult<gst_webrtc::WebRTCDataChannel> {
        transport
            .emit_by_name::<Option<gst_webrtc::WebRTCDataChannel>>(
                "create-data-channel",
                &[&label, &None::<gst::Structure>],
            )
            .ok_or_else(|| GraphError::construction("data channel", format!("{} was refused", label)))
    }

    fn observe_channel(&self, channel: &gst_webrtc::WebRTCDataChannel, handler: ChannelHandler) -> Subscription {
        let handler: Arc<dyn Fn(ChannelEvent) + Send + Sync> = Arc::from(handler);
        let mut ids = Vec::with_capacity(5);

        let h = Arc::clone(&handler);
        ids.push(channel.connect("on-open", false, move |_| {
            h(ChannelEvent::Open);
            None
        }));

        let h = Arc::clone(&handler);
        ids.push(channel.connect("on-close", false, move |_| {
            h(ChannelEvent::Close);
            None
        }));

        let h = Arc::clone(&handler);
        ids.push(channel.connect("on-error", false, move |values| {
            let message = values
                .get(1)
                .and_then(|v| v.get::<glib::Error>().ok())
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string());
            h(ChannelEvent::Error(message));
            None
        }));

        let h = Arc::clone(&handler);
        ids.push(channel.connect("on-message-string", false, move |values| {
            if let Some(text) = values.get(1).and_then(|v| v.get::<Option<String>>().ok()).flatten() {
                h(ChannelEvent::Text(text));
            }
            None
        }));

        let h = handler;
        ids.push(channel.connect("on-message-data", false, move |values| {
            if let Some(bytes) = values
                .get(1)
                .and_then(|v| v.get::<Option<glib::Bytes>>().ok())
                .flatten()
            {
                h(ChannelEvent::Binary(bytes.to_vec()));
            }
            None
        }));

        let channel = channel.clone();
        Subscription::new(move || {
            for id in ids {
                channel.disconnect(id);
            }
        })
    }

    fn observe_remote_channels(
        &self,
        transport: &gst::Element,
        handler: Box<dyn Fn(gst_webrtc::WebRTCDataChannel) + Send + Sync>,
    ) -> Subscription {
        let id = transport.connect("on-data-channel", false, move |values| {
            if let Some(channel) = values
                .get(1)
                .and_then(|v| v.get::<gst_webrtc::WebRTCDataChannel>().ok())
            {
                handler(channel);
            }
            None
        });

        let transport = transport.clone();
        Subscription::new(move || transport.disconnect(id))
    }

    fn send_text(&self, channel: &gst_webrtc::WebRTCDataChannel, text: &str) {
        channel.emit_by_name::<()>("send-string", &[&text]);
    }

    fn send_binary(&self, channel: &gst_webrtc::WebRTCDataChannel, data: &[u8]) {
        let bytes = glib::Bytes::from_owned(data.to_vec());
        channel.emit_by_name::<()>("send-data", &[&bytes]);
    }

    fn close_channel(&self, channel: &gst_webrtc::WebRTCDataChannel) {
        channel.emit_by_name::<()>("close", &[]);
    }

    fn observe_transport(
        &self,
        transport: &gst::Element,
        handler: Box<dyn Fn(TransportEvent<gst::Pad>) + Send + Sync>,
    ) -> Subscription {
        let handler: Arc<dyn Fn(TransportEvent<gst::Pad>) + Send + Sync> = Arc::from(handler);
        let mut ids = Vec::with_capacity(5);

        let h = Arc::clone(&handler);
        ids.push(transport.connect_notify(Some("connection-state"), move |bin, _| {
            h(TransportEvent::ConnectionState(peer_connection_state(bin)));
        }));

        let h = Arc::clone(&handler);
        ids.push(transport.connect_notify(Some("ice-gathering-state"), move |bin, _| {
            h(TransportEvent::IceGatheringState(gathering_state(bin)));
        }));

        let h = Arc::clone(&handler);
        ids.push(transport.connect_pad_added(move |_, pad| {
            if pad.direction() == gst::PadDirection::Src {
                h(TransportEvent::PadAdded(remote_pad(pad)));
            }
        }));

        let h = Arc::clone(&handler);
        ids.push(transport.connect_pad_removed(move |_, pad| {
            h(TransportEvent::PadRemoved(pad.name().to_string()));
        }));

        let h = handler;
        ids.push(transport.connect("on-new-transceiver", false, move |values| {
            if let Some(transceiver) = values
                .get(1)
                .and_then(|v| v.get::<gst_webrtc::WebRTCRTPTransceiver>().ok())
            {
                transceiver.set_property("fec-type", gst_webrtc::WebRTCFECType::UlpRed);
                h(TransportEvent::NewTransceiver);
            }
            None
        }));

        let transport = transport.clone();
        Subscription::new(move || {
            for id in ids {
                transport.disconnect(id);
            }
        })
    }

    fn connection_state(&self, transport: &gst::Element) -> PeerConnectionState {
        peer_connection_state(transport)
    }

    fn ice_gathering_state(&self, transport: &gst::Element) -> IceGatheringState {
        gathering_state(transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_mapping_round_trips() {
        for state in [
            PipelineState::Null,
            PipelineState::Ready,
            PipelineState::Paused,
            PipelineState::Playing,
        ] {
            assert_eq!(from_gst_state(to_gst_state(state)), state);
        }
    }

    #[test]
    fn test_make_element_applies_textual_properties() {
        let Ok(engine) = GstEngine::new() else {
            return;
        };
        if !engine.has_factory("queue") {
            return;
        }

        let queue = engine
            .make_element(
                &ElementSpec::new("queue")
                    .named("probe_queue")
                    .prop("max-size-buffers", 1)
                    .prop("no-such-property", "ignored"),
            )
            .unwrap();
        assert_eq!(engine.element_name(&queue), "probe_queue");
        assert_eq!(queue.property::<u32>("max-size-buffers"), 1);
    }
}
