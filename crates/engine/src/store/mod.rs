// Annotation store: the single owner of durable annotation state.
//
// Explicitly passed by reference, never a process-wide singleton. All
// mutation goes through this surface; the resolution service stays pure and
// hands its computed display states back via `apply_display_states`.
// Subscribers are notified after every mutation with the full id-sorted set.

use std::collections::BTreeMap;

use tracing::debug;

use marginalia_common::types::{Annotation, AnnotationId, ResolvedAnnotation};

/// Callback invoked with the full annotation set after each mutation.
pub type Subscriber = Box<dyn Fn(&[Annotation])>;

#[derive(Default)]
pub struct AnnotationStore {
    annotations: BTreeMap<AnnotationId, Annotation>,
    subscribers: Vec<Subscriber>,
}

impl AnnotationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the entire annotation set.
    pub fn set_annotations(&mut self, annotations: Vec<Annotation>) {
        self.annotations = annotations.into_iter().map(|a| (a.id.clone(), a)).collect();
        self.notify();
    }

    /// Insert or replace one annotation. Returns true if it replaced an
    /// existing entry.
    pub fn upsert(&mut self, annotation: Annotation) -> bool {
        let replaced = self.annotations.insert(annotation.id.clone(), annotation).is_some();
        self.notify();
        replaced
    }

    /// Remove an annotation. Returns true if it existed.
    pub fn remove(&mut self, id: &str) -> bool {
        let removed = self.annotations.remove(id).is_some();
        if removed {
            self.notify();
        }
        removed
    }

    pub fn get(&self, id: &str) -> Option<&Annotation> {
        self.annotations.get(id)
    }

    /// All annotations, id-sorted.
    pub fn all(&self) -> Vec<Annotation> {
        self.annotations.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.annotations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.annotations.is_empty()
    }

    /// Write the display states computed by a resolution pass back into the
    /// store. Only `display_state` changes; spans and stored state do not.
    pub fn apply_display_states(&mut self, resolved: &[ResolvedAnnotation]) {
        let mut changed = 0usize;
        for outcome in resolved {
            if let Some(anno) = self.annotations.get_mut(&outcome.id) {
                if anno.display_state != outcome.state {
                    anno.display_state = outcome.state;
                    changed += 1;
                }
            }
        }
        if changed > 0 {
            debug!(changed, "display states updated from resolution pass");
            self.notify();
        }
    }

    /// Register a subscriber. Fired after every mutation.
    pub fn subscribe(&mut self, subscriber: Subscriber) {
        self.subscribers.push(subscriber);
    }

    /// Byte-for-byte copy of the full set, sorted by id.
    pub fn snapshot(&self) -> Vec<Annotation> {
        self.all()
    }

    fn notify(&self) {
        if self.subscribers.is_empty() {
            return;
        }
        let current: Vec<Annotation> = self.annotations.values().cloned().collect();
        for subscriber in &self.subscribers {
            subscriber(&current);
        }
    }
}
