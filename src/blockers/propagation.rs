//! Who re-emits whose blocker events.
//!
//! A resource has at most two edges: its structural parent and the related
//! resource of the embedding collection it belongs to. Both are non-owning.

use crate::events::{Event, EventPayload, Topic};
use crate::resource::{Resource, WeakResource};
use log::debug;

#[derive(Debug, Clone)]
pub enum PropagationEdge {
    Parent(Resource),
    CollectionRelated { field: String, related: Resource },
}

impl PropagationEdge {
    pub fn target(&self) -> &Resource {
        match self {
            PropagationEdge::Parent(parent) => parent,
            PropagationEdge::CollectionRelated { related, .. } => related,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PropagationEdges {
    parent: Option<WeakResource>,
    collection: Option<(String, WeakResource)>,
}

impl PropagationEdges {
    pub fn set_parent(&mut self, parent: &Resource) {
        self.parent = Some(parent.downgrade());
    }

    pub fn set_collection(&mut self, field: &str, related: &Resource) {
        self.collection = Some((field.to_string(), related.downgrade()));
    }

    pub fn clear_collection(&mut self) {
        self.collection = None;
    }

    pub fn parent(&self) -> Option<Resource> {
        self.parent.as_ref().and_then(WeakResource::upgrade)
    }

    pub fn edges(&self) -> Vec<PropagationEdge> {
        let mut edges = Vec::with_capacity(2);
        if let Some(parent) = self.parent() {
            edges.push(PropagationEdge::Parent(parent));
        }
        if let Some((field, related)) = &self.collection {
            if let Some(related) = related.upgrade() {
                edges.push(PropagationEdge::CollectionRelated {
                    field: field.clone(),
                    related,
                });
            }
        }
        edges
    }

    pub fn targets(&self) -> Vec<Resource> {
        let mut targets: Vec<Resource> = Vec::with_capacity(2);
        for edge in self.edges() {
            let target = edge.target();
            if !targets.iter().any(|seen| seen.ptr_eq(target)) {
                targets.push(target.clone());
            }
        }
        targets
    }
}

/// Runs after local listeners saw `event` on `resource`: updates the blocking
/// set and forwards `saveblocked` / `oktosave` along the edges.
///
/// A `destroy` withdraws the resource from every ancestor as an `oktosave`.
pub(crate) fn after_dispatch(resource: &Resource, event: &Event, trail: &mut Vec<String>) {
    let forwarded = match &event.topic {
        Topic::SaveBlocked => {
            if let Some(blocker) = event.blocker() {
                resource.save_blockers().note_blocking(&blocker.resource);
            }
            event.clone()
        }
        Topic::OkToSave => {
            if let Some(source) = event.resource() {
                resource.save_blockers().release_blocking(source);
            }
            event.clone()
        }
        Topic::Destroy => {
            resource.save_blockers().release_blocking(resource);
            Event::new(Topic::OkToSave, EventPayload::Resource(resource.clone()))
        }
        _ => return,
    };

    trail.push(resource.cid().to_string());
    for target in resource.propagation_targets() {
        if trail.iter().any(|cid| cid == target.cid()) {
            debug!(
                "skipping cyclic propagation edge {} -> {}",
                resource.table(),
                target.table()
            );
            continue;
        }
        target.dispatch(&forwarded, trail);
    }
    trail.pop();
}
