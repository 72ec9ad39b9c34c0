// SPDX-License-Identifier: GPL-3.0-only

//! Decode sub-paths for streams received from a peer

use super::hardware::select_h264_decoder;
use crate::backends::{ElementSpec, MediaEngine, StreamKind};
use tracing::{debug, warn};

/// Elements to attach behind a remote pad, in link order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodePath {
    pub kind: StreamKind,
    pub elements: Vec<ElementSpec>,
    /// False when video is decoded but discarded for lack of a display
    pub rendered: bool,
}

impl DecodePath {
    pub fn factories(&self) -> Vec<&str> {
        self.elements.iter().map(|e| e.factory.as_str()).collect()
    }
}

/// Choose a decode path from the `media` and `encoding-name` of a remote pad
///
/// Returns `None` for media kinds other than audio and video.
pub fn decode_path_for<E: MediaEngine>(
    engine: &E,
    media: Option<&str>,
    encoding: Option<&str>,
    graphical: bool,
) -> Option<DecodePath> {
    let encoding = encoding.map(str::to_ascii_uppercase);

    match media {
        Some("audio") => {
            let mut elements = match encoding.as_deref() {
                Some("OPUS") => vec![ElementSpec::new("rtpopusdepay"), ElementSpec::new("opusdec")],
                _ => vec![ElementSpec::new("decodebin").with_sometimes_pads()],
            };
            elements.push(ElementSpec::new("queue"));
            elements.push(ElementSpec::new("audioconvert"));
            if engine.has_factory("webrtcechoprobe") {
                elements.push(ElementSpec::new("webrtcechoprobe"));
            }
            elements.push(ElementSpec::new("autoaudiosink"));

            Some(DecodePath {
                kind: StreamKind::Audio,
                elements,
                rendered: true,
            })
        }
        Some("video") => {
            let mut elements = match encoding.as_deref() {
                Some("VP8") => vec![ElementSpec::new("rtpvp8depay"), ElementSpec::new("vp8dec")],
                Some("H264") => vec![
                    ElementSpec::new("rtph264depay"),
                    ElementSpec::new("h264parse"),
                    ElementSpec::new(select_h264_decoder(engine)),
                ],
                _ => vec![ElementSpec::new("decodebin").with_sometimes_pads()],
            };
            elements.push(ElementSpec::new("queue"));
            elements.push(ElementSpec::new("videoconvert"));
            if graphical {
                elements.push(ElementSpec::new("autovideosink"));
            } else {
                debug!("No graphical session, received video is decoded and dropped");
                elements.push(ElementSpec::new("fakesink").prop("sync", false));
            }

            Some(DecodePath {
                kind: StreamKind::Video,
                elements,
                rendered: graphical,
            })
        }
        other => {
            warn!(media = ?other, "Ignoring remote pad with unknown media type");
            None
        }
    }
}
