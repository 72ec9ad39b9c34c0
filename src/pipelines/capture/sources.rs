// SPDX-License-Identifier: MPL-2.0

//! Capture stage topologies
//!
//! Each stage ends in a tee. Stages that consume another tee's output expose
//! an entry node that the graph attaches like any other branch.

use super::tee::TeePointId;
use crate::backends::ElementSpec;
use crate::config::DeviceConfig;
use crate::constants::encoder;
use crate::media::H264Encoder;
use crate::pipelines::topology::{NodeId, Topology};

/// A capture stage ready to be instantiated into the capture pipeline
pub(crate) struct Stage {
    pub tee_point: TeePointId,
    pub topology: Topology,
    /// Node fed from an upstream tee, if any
    pub entry: Option<(TeePointId, NodeId)>,
    pub tee: NodeId,
}

fn tee(id: TeePointId) -> ElementSpec {
    ElementSpec::new("tee")
        .named(id.as_str())
        .prop("allow-not-linked", true)
}

fn raw_caps(device: &DeviceConfig, media_type: &str) -> String {
    format!(
        "{},width={},height={},framerate={}/1",
        media_type, device.width, device.height, device.framerate
    )
}

/// `v4l2src → capsfilter → [jpegparse → jpegdec] → queue → videoconvert → tee`
pub(crate) fn video_capture(device: &DeviceConfig) -> Stage {
    let mut topology = Topology::new("video-capture");

    let caps = if device.is_jpeg() {
        raw_caps(device, &device.caps_type)
    } else {
        raw_caps(device, &format!("{},format={}", device.caps_type, device.format))
    };
    let mut specs = vec![ElementSpec::caps_filter(caps)];
    if device.is_jpeg() {
        specs.push(ElementSpec::new("jpegparse"));
        specs.push(ElementSpec::new("jpegdec"));
    }
    specs.push(ElementSpec::new("queue"));
    specs.push(ElementSpec::new("videoconvert"));
    specs.push(tee(TeePointId::RawVideo));

    let source = ElementSpec::new("v4l2src")
        .prop("device", &device.device)
        .prop("io-mode", device.io_mode);
    let (_, tee) = topology.chain(source, specs);

    Stage {
        tee_point: TeePointId::RawVideo,
        topology,
        entry: None,
        tee,
    }
}

/// `queue → clockoverlay → encoder → capsfilter(profile) → tee`
pub(crate) fn h264_encoding(selected: H264Encoder) -> Stage {
    let mut topology = Topology::new("h264-encoding");
    let (entry, tee) = topology.chain(
        ElementSpec::new("queue").prop("max-size-buffers", 1),
        [
            ElementSpec::new("clockoverlay").prop("time-format", encoder::CLOCK_TIME_FORMAT),
            selected.spec(),
            ElementSpec::caps_filter(encoder::H264_PROFILE_CAPS),
            tee(TeePointId::EncodedVideo),
        ],
    );

    Stage {
        tee_point: TeePointId::EncodedVideo,
        topology,
        entry: Some((TeePointId::RawVideo, entry)),
        tee,
    }
}

/// `pipewiresrc → audioconvert → audioresample → opusenc → tee`
pub(crate) fn audio_capture() -> Stage {
    let mut topology = Topology::new("audio-capture");
    let (_, tee) = topology.chain(
        ElementSpec::new("pipewiresrc"),
        [
            ElementSpec::new("audioconvert"),
            ElementSpec::new("audioresample"),
            ElementSpec::new("opusenc"),
            tee(TeePointId::EncodedAudio),
        ],
    );

    Stage {
        tee_point: TeePointId::EncodedAudio,
        topology,
        entry: None,
        tee,
    }
}

/// `vaapipostproc → capsfilter → clockoverlay → tee`
pub(crate) fn post_processing(device: &DeviceConfig) -> Stage {
    let mut topology = Topology::new("post-processing");
    let (entry, tee) = topology.chain(
        ElementSpec::new("vaapipostproc").prop("format", "nv12"),
        [
            ElementSpec::caps_filter(raw_caps(device, "video/x-raw")),
            ElementSpec::new("clockoverlay").prop("time-format", encoder::CLOCK_TIME_FORMAT),
            tee(TeePointId::PostProcessed),
        ],
    );

    Stage {
        tee_point: TeePointId::PostProcessed,
        topology,
        entry: Some((TeePointId::RawVideo, entry)),
        tee,
    }
}
