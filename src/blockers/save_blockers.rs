use super::blocker::{Blocker, BlockerEntry};
use crate::events::{Event, EventPayload, Topic};
use crate::resource::{Resource, WeakResource};
use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldListenerId(u64);

type FieldCallback = Rc<dyn Fn(&[Blocker])>;

struct FieldListener {
    id: FieldListenerId,
    field_name: String,
    callback: FieldCallback,
}

/// Blocker registry owned by one resource.
///
/// Holds the resource's own blockers (in insertion order) and the set of
/// resources anywhere below it that currently block it, itself included once
/// one of its blockers has fired.
pub struct SaveBlockers {
    owner: WeakResource,
    blockers: RefCell<Vec<BlockerEntry>>,
    blocking: RefCell<Vec<WeakResource>>,
    field_listeners: RefCell<Vec<FieldListener>>,
    next_listener: Cell<u64>,
}

impl SaveBlockers {
    pub(crate) fn new(owner: WeakResource) -> Self {
        Self {
            owner,
            blockers: RefCell::new(Vec::new()),
            blocking: RefCell::new(Vec::new()),
            field_listeners: RefCell::new(Vec::new()),
            next_listener: Cell::new(0),
        }
    }

    /// Adds or replaces the blocker stored under `key`.
    ///
    /// `saveblocked` (and `saveblocked: <field>`) fire right away unless the
    /// blocker is deferred; `blockerschanged` always fires.
    pub fn add(&self, key: &str, field_name: Option<&str>, reason: &str, deferred: bool) {
        let Some(owner) = self.owner.upgrade() else {
            return;
        };
        let entry = BlockerEntry {
            key: key.to_string(),
            field_name: field_name.map(str::to_lowercase),
            reason: reason.to_string(),
            deferred,
        };

        // An upsert may move the blocker to another field; both get notified.
        let replaced_field = {
            let mut blockers = self.blockers.borrow_mut();
            match blockers.iter_mut().find(|existing| existing.key == key) {
                Some(existing) => {
                    let previous = existing.field_name.clone();
                    *existing = entry.clone();
                    previous
                }
                None => {
                    blockers.push(entry.clone());
                    None
                }
            }
        };
        owner.session().diagnostics().track(&owner);

        if !deferred {
            self.notify_blocked(&owner, &entry.to_blocker(&owner));
        }
        if let Some(previous) = replaced_field.filter(|previous| Some(previous) != entry.field_name.as_ref()) {
            if self.blockers_for_field(&previous).is_empty() {
                owner.trigger(&Event::bare(Topic::NoSaveBlockersField(previous.clone())));
            }
            self.notify_field_listeners(&previous);
        }
        owner.trigger(&Event::bare(Topic::BlockersChanged));
        if let Some(field_name) = &entry.field_name {
            self.notify_field_listeners(field_name);
        }
    }

    /// Removes the blocker stored under `key`. Returns false if there was none.
    pub fn remove(&self, key: &str) -> bool {
        let Some(owner) = self.owner.upgrade() else {
            return false;
        };
        let (removed, now_empty) = {
            let mut blockers = self.blockers.borrow_mut();
            let Some(index) = blockers.iter().position(|existing| existing.key == key) else {
                return false;
            };
            let removed = blockers.remove(index);
            (removed, blockers.is_empty())
        };

        if let Some(field_name) = &removed.field_name {
            if self.blockers_for_field(field_name).is_empty() {
                owner.trigger(&Event::bare(Topic::no_save_blockers_on(field_name)));
            }
        }
        if now_empty {
            owner.session().diagnostics().untrack(&owner);
            owner.trigger(&Event::new(Topic::OkToSave, EventPayload::Resource(owner.clone())));
        }
        owner.trigger(&Event::bare(Topic::BlockersChanged));
        if let Some(field_name) = &removed.field_name {
            self.notify_field_listeners(field_name);
        }
        true
    }

    /// Surfaces every deferred blocker; each stops being deferred.
    pub fn fire_deferred_blockers(&self) {
        let Some(owner) = self.owner.upgrade() else {
            return;
        };
        let fired: Vec<BlockerEntry> = {
            let mut blockers = self.blockers.borrow_mut();
            blockers
                .iter_mut()
                .filter(|entry| entry.deferred)
                .map(|entry| {
                    entry.deferred = false;
                    entry.clone()
                })
                .collect()
        };

        for entry in &fired {
            self.notify_blocked(&owner, &entry.to_blocker(&owner));
        }
        for entry in &fired {
            if let Some(field_name) = &entry.field_name {
                self.notify_field_listeners(field_name);
            }
        }
    }

    pub fn blockers(&self) -> Vec<Blocker> {
        let Some(owner) = self.owner.upgrade() else {
            return Vec::new();
        };
        self.blockers
            .borrow()
            .iter()
            .map(|entry| entry.to_blocker(&owner))
            .collect()
    }

    pub fn get(&self, key: &str) -> Option<Blocker> {
        let owner = self.owner.upgrade()?;
        self.blockers
            .borrow()
            .iter()
            .find(|entry| entry.key == key)
            .map(|entry| entry.to_blocker(&owner))
    }

    pub fn blockers_for_field(&self, field_name: &str) -> Vec<Blocker> {
        let Some(owner) = self.owner.upgrade() else {
            return Vec::new();
        };
        self.blockers
            .borrow()
            .iter()
            .filter(|entry| entry.is_on_field(field_name))
            .map(|entry| entry.to_blocker(&owner))
            .collect()
    }

    /// Reasons of the blockers on `field_name`, for display next to the field.
    pub fn get_field_errors(&self, field_name: &str) -> Vec<String> {
        self.blockers
            .borrow()
            .iter()
            .filter(|entry| entry.is_on_field(field_name))
            .map(|entry| entry.reason.clone())
            .collect()
    }

    pub fn has_blockers(&self) -> bool {
        !self.blockers.borrow().is_empty()
    }

    pub fn len(&self) -> usize {
        self.blockers.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blockers.borrow().is_empty()
    }

    /// True iff every blocker on this resource is still deferred (vacuously true when none).
    pub fn has_only_deferred_blockers(&self) -> bool {
        self.blockers.borrow().iter().all(|entry| entry.deferred)
    }

    /// True iff every resource transitively reachable through the blocking sets
    /// has only deferred blockers.
    pub fn blocking_has_only_deferred_blockers(&self) -> bool {
        let mut visited = HashSet::new();
        if let Some(owner) = self.owner.upgrade() {
            visited.insert(owner.cid().to_string());
        }
        self.blocking_only_deferred(&mut visited)
    }

    fn blocking_only_deferred(&self, visited: &mut HashSet<String>) -> bool {
        for resource in self.blocking_resources() {
            let blockers = resource.save_blockers();
            if !blockers.has_only_deferred_blockers() {
                return false;
            }
            if visited.insert(resource.cid().to_string()) && !blockers.blocking_only_deferred(visited) {
                return false;
            }
        }
        true
    }

    /// Resources currently blocking the owner, in the order they were first seen.
    pub fn blocking_resources(&self) -> Vec<Resource> {
        self.blocking
            .borrow()
            .iter()
            .filter_map(WeakResource::upgrade)
            .collect()
    }

    pub fn is_blocking(&self, resource: &Resource) -> bool {
        self.blocking_resources()
            .iter()
            .any(|blocking| blocking.ptr_eq(resource))
    }

    /// The owner cannot be saved: some resource in its graph has a fired blocker.
    pub fn is_blocked(&self) -> bool {
        !self.blocking_resources().is_empty()
    }

    /// Calls `callback` with the current blockers of `field_name` whenever they
    /// are added, removed or fired.
    pub fn on_field_change(
        &self,
        field_name: &str,
        callback: impl Fn(&[Blocker]) + 'static,
    ) -> FieldListenerId {
        let id = FieldListenerId(self.next_listener.get());
        self.next_listener.set(id.0 + 1);
        self.field_listeners.borrow_mut().push(FieldListener {
            id,
            field_name: field_name.to_lowercase(),
            callback: Rc::new(callback),
        });
        id
    }

    pub fn off_field_change(&self, id: FieldListenerId) -> bool {
        let mut listeners = self.field_listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|listener| listener.id != id);
        listeners.len() != before
    }

    pub(crate) fn note_blocking(&self, resource: &Resource) {
        let mut blocking = self.blocking.borrow_mut();
        blocking.retain(|weak| weak.upgrade().is_some());
        let known = blocking
            .iter()
            .filter_map(WeakResource::upgrade)
            .any(|existing| existing.ptr_eq(resource));
        if !known {
            blocking.push(resource.downgrade());
        }
    }

    pub(crate) fn release_blocking(&self, resource: &Resource) {
        self.blocking.borrow_mut().retain(|weak| match weak.upgrade() {
            Some(existing) => !existing.ptr_eq(resource),
            None => false,
        });
    }

    fn notify_blocked(&self, owner: &Resource, blocker: &Blocker) {
        owner.trigger(&Event::new(Topic::SaveBlocked, EventPayload::Blocker(blocker.clone())));
        if let Some(field_name) = &blocker.field_name {
            owner.trigger(&Event::new(
                Topic::save_blocked_on(field_name),
                EventPayload::Blocker(blocker.clone()),
            ));
        }
    }

    fn notify_field_listeners(&self, field_name: &str) {
        let callbacks: Vec<FieldCallback> = self
            .field_listeners
            .borrow()
            .iter()
            .filter(|listener| listener.field_name.eq_ignore_ascii_case(field_name))
            .map(|listener| listener.callback.clone())
            .collect();
        if callbacks.is_empty() {
            return;
        }
        let current = self.blockers_for_field(field_name);
        for callback in callbacks {
            callback(&current);
        }
    }
}
