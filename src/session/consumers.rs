// SPDX-License-Identifier: MPL-2.0

//! Registry of in-process injection endpoints fed by the fan-out tap

use crate::backends::{MediaEngine, StreamKind};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConsumerId(u64);

/// The two appsrc elements of one consumer pipeline
pub struct InjectionEndpoints<E: MediaEngine> {
    pub video: E::Element,
    pub audio: E::Element,
}

impl<E: MediaEngine> Clone for InjectionEndpoints<E> {
    fn clone(&self) -> Self {
        Self {
            video: self.video.clone(),
            audio: self.audio.clone(),
        }
    }
}

impl<E: MediaEngine> fmt::Debug for InjectionEndpoints<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InjectionEndpoints")
            .field("video", &self.video)
            .field("audio", &self.audio)
            .finish()
    }
}

impl<E: MediaEngine> InjectionEndpoints<E> {
    pub fn get(&self, kind: StreamKind) -> &E::Element {
        match kind {
            StreamKind::Video => &self.video,
            StreamKind::Audio => &self.audio,
        }
    }
}

pub struct ConsumerRegistry<E: MediaEngine> {
    engine: Arc<E>,
    consumers: Mutex<BTreeMap<ConsumerId, InjectionEndpoints<E>>>,
    next_id: AtomicU64,
}

impl<E: MediaEngine> ConsumerRegistry<E> {
    pub fn new(engine: Arc<E>) -> Self {
        Self {
            engine,
            consumers: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn register(&self, endpoints: InjectionEndpoints<E>) -> ConsumerId {
        let id = ConsumerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut consumers = self.consumers.lock();
        consumers.insert(id, endpoints);
        debug!(consumer = id.0, total = consumers.len(), "Registered consumer");
        id
    }

    /// Remove a consumer; `false` if it was not registered
    pub fn unregister(&self, id: ConsumerId) -> bool {
        let mut consumers = self.consumers.lock();
        let removed = consumers.remove(&id).is_some();
        if removed {
            debug!(consumer = id.0, total = consumers.len(), "Unregistered consumer");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.consumers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.consumers.lock().is_empty()
    }

    pub fn contains(&self, id: ConsumerId) -> bool {
        self.consumers.lock().contains_key(&id)
    }

    /// Visit every consumer while holding the registry lock
    ///
    /// `f` must not call back into the registry.
    pub fn for_each(&self, mut f: impl FnMut(ConsumerId, &InjectionEndpoints<E>)) {
        let consumers = self.consumers.lock();
        for (id, endpoints) in consumers.iter() {
            f(*id, endpoints);
        }
    }

    /// Push a copy of `buffer` to the matching endpoint of every consumer
    pub fn fan_out(&self, kind: StreamKind, buffer: E::Buffer) {
        self.for_each(|id, endpoints| {
            if let Err(err) = self.engine.push_buffer(endpoints.get(kind), buffer.clone()) {
                // Endpoints refuse data while their pipeline is shutting down
                trace!(consumer = id.0, %kind, error = %err, "Consumer dropped buffer");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::ElementSpec;
    use crate::backends::mock::MockEngine;

    fn endpoints(engine: &MockEngine) -> InjectionEndpoints<MockEngine> {
        InjectionEndpoints {
            video: engine.make_element(&ElementSpec::new("appsrc")).unwrap(),
            audio: engine.make_element(&ElementSpec::new("appsrc")).unwrap(),
        }
    }

    #[test]
    fn test_fan_out_reaches_every_consumer() {
        let engine = MockEngine::new();
        let registry = ConsumerRegistry::new(Arc::clone(&engine));
        let first = endpoints(&engine);
        let second = endpoints(&engine);
        registry.register(first.clone());
        registry.register(second.clone());

        registry.fan_out(StreamKind::Video, vec![1, 2, 3]);
        registry.fan_out(StreamKind::Audio, vec![9]);

        assert_eq!(first.video.pushed(), [vec![1, 2, 3]]);
        assert_eq!(second.video.pushed(), [vec![1, 2, 3]]);
        assert_eq!(second.audio.pushed(), [vec![9]]);
    }

    #[test]
    fn test_unregistered_consumer_gets_nothing() {
        let engine = MockEngine::new();
        let registry = ConsumerRegistry::new(Arc::clone(&engine));
        let gone = endpoints(&engine);
        let id = registry.register(gone.clone());

        assert!(registry.unregister(id));
        assert!(!registry.unregister(id));
        registry.fan_out(StreamKind::Video, vec![1]);

        assert!(gone.video.pushed().is_empty());
        assert!(registry.is_empty());
    }
}
