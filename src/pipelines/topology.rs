// SPDX-License-Identifier: MPL-2.0

//! Programmatic sub-pipeline descriptions
//!
//! A [`Topology`] lists element specs and the links between them. It is
//! instantiated into a container (pipeline or bin) in one step; if any
//! element fails to build or link, everything already added is removed again.

use crate::backends::{ElementSpec, MediaEngine, PipelineState};
use crate::errors::{GraphError, GraphResult};
use tracing::{debug, warn};

/// Index of an element inside a [`Topology`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

#[derive(Debug, Clone, PartialEq, Eq)]
enum Edge {
    /// Let the engine pick compatible pads
    Auto,
    /// Source pad `src` into a pad requested from the sink's template
    RequestPad(String),
}

#[derive(Debug, Clone)]
pub struct Topology {
    name: String,
    nodes: Vec<ElementSpec>,
    edges: Vec<(NodeId, NodeId, Edge)>,
}

impl Topology {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn add(&mut self, spec: ElementSpec) -> NodeId {
        self.nodes.push(spec);
        NodeId(self.nodes.len() - 1)
    }

    /// Add `first` followed by `rest`, each linked to the next
    ///
    /// Returns the ids of the first and last element.
    pub fn chain(
        &mut self,
        first: ElementSpec,
        rest: impl IntoIterator<Item = ElementSpec>,
    ) -> (NodeId, NodeId) {
        let head = self.add(first);
        let tail = self.extend(head, rest);
        (head, tail)
    }

    /// Append specs after an existing node; returns the last element
    pub fn extend(&mut self, after: NodeId, specs: impl IntoIterator<Item = ElementSpec>) -> NodeId {
        let mut last = after;
        for spec in specs {
            let id = self.add(spec);
            self.link(last, id);
            last = id;
        }
        last
    }

    pub fn link(&mut self, src: NodeId, sink: NodeId) {
        self.edges.push((src, sink, Edge::Auto));
    }

    pub fn link_to_request_pad(&mut self, src: NodeId, sink: NodeId, template: impl Into<String>) {
        self.edges.push((src, sink, Edge::RequestPad(template.into())));
    }

    pub fn spec(&self, id: NodeId) -> &ElementSpec {
        &self.nodes[id.0]
    }

    pub fn find(&self, factory: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .position(|s| s.factory == factory)
            .map(NodeId)
    }

    pub fn specs(&self) -> &[ElementSpec] {
        &self.nodes
    }

    pub fn factories(&self) -> Vec<&str> {
        self.nodes.iter().map(|s| s.factory.as_str()).collect()
    }

    /// Whether `src` is linked directly to `sink`
    pub fn links(&self, src: NodeId, sink: NodeId) -> bool {
        self.edges.iter().any(|(a, b, _)| *a == src && *b == sink)
    }

    /// Build every element inside `container` and link them
    pub fn instantiate<E: MediaEngine>(
        &self,
        engine: &E,
        container: &E::Element,
    ) -> GraphResult<BuiltTopology<E>> {
        let mut built = BuiltTopology {
            name: self.name.clone(),
            elements: Vec::with_capacity(self.nodes.len()),
            requested: Vec::new(),
        };

        for spec in &self.nodes {
            let element = match engine.make_element(spec) {
                Ok(element) => element,
                Err(err) => {
                    built.release(engine, container);
                    return Err(err);
                }
            };
            if let Err(err) = engine.add(container, &element) {
                built.release(engine, container);
                return Err(err);
            }
            built.elements.push(element);
        }

        for (src, sink, edge) in &self.edges {
            let src_element = built.elements[src.0].clone();
            let sink_element = built.elements[sink.0].clone();

            let linked = match edge {
                Edge::Auto if self.nodes[src.0].sometimes_pads => {
                    engine.link_on_pad_added(&src_element, &sink_element);
                    true
                }
                Edge::Auto => engine.link(&src_element, &sink_element),
                Edge::RequestPad(template) => {
                    match link_into_request_pad(engine, &src_element, &sink_element, template) {
                        Some(pad) => {
                            built.requested.push((sink_element.clone(), pad));
                            true
                        }
                        None => false,
                    }
                }
            };

            if !linked {
                let err = GraphError::link(self.nodes[src.0].label(), self.nodes[sink.0].label());
                warn!(topology = %self.name, error = %err, "Topology link failed");
                built.release(engine, container);
                return Err(err);
            }
        }

        debug!(topology = %self.name, elements = self.nodes.len(), "Instantiated topology");
        Ok(built)
    }
}

fn link_into_request_pad<E: MediaEngine>(
    engine: &E,
    src: &E::Element,
    sink: &E::Element,
    template: &str,
) -> Option<E::Pad> {
    let src_pad = engine.static_pad(src, "src")?;
    let sink_pad = engine.request_pad(sink, template)?;
    if engine.link_pads(&src_pad, &sink_pad) {
        Some(sink_pad)
    } else {
        engine.release_pad(sink, &sink_pad);
        None
    }
}

/// Elements created from a [`Topology`], owned by their container
pub struct BuiltTopology<E: MediaEngine> {
    name: String,
    elements: Vec<E::Element>,
    requested: Vec<(E::Element, E::Pad)>,
}

impl<E: MediaEngine> BuiltTopology<E> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn element(&self, id: NodeId) -> &E::Element {
        &self.elements[id.0]
    }

    pub fn elements(&self) -> &[E::Element] {
        &self.elements
    }

    /// Bring every element to the container's current state
    pub fn sync_with_parent(&self, engine: &E) -> GraphResult<()> {
        for element in &self.elements {
            engine.sync_state_with_parent(element)?;
        }
        Ok(())
    }

    /// Stop and remove every element from `container`
    pub fn release(self, engine: &E, container: &E::Element) {
        for (element, pad) in &self.requested {
            engine.release_pad(element, pad);
        }
        for element in self.elements.iter().rev() {
            if let Err(err) = engine.set_state(element, PipelineState::Null) {
                debug!(error = %err, "Element refused to stop during release");
            }
            if let Err(err) = engine.remove(container, element) {
                warn!(topology = %self.name, error = %err, "Failed to remove element");
            }
        }
    }
}
