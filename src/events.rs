//! Synchronous event emission for resources and collections.
//!
//! Dispatch is synchronous and happens in registration order: every listener
//! registered before a `trigger` call has run by the time it returns.

use crate::blockers::Blocker;
use crate::resource::Resource;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

/// Event names understood by resources and collections.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    Change,
    ChangeField(String),
    Add,
    Remove,
    Destroy,
    Saved,
    SaveRequired,
    SaveBlocked,
    SaveBlockedField(String),
    NoSaveBlockersField(String),
    OkToSave,
    BlockersChanged,
}

impl Topic {
    pub fn change_of(field: &str) -> Self {
        Self::ChangeField(field.to_lowercase())
    }

    pub fn save_blocked_on(field: &str) -> Self {
        Self::SaveBlockedField(field.to_lowercase())
    }

    pub fn no_save_blockers_on(field: &str) -> Self {
        Self::NoSaveBlockersField(field.to_lowercase())
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Change => write!(f, "change"),
            Topic::ChangeField(field) => write!(f, "change:{}", field),
            Topic::Add => write!(f, "add"),
            Topic::Remove => write!(f, "remove"),
            Topic::Destroy => write!(f, "destroy"),
            Topic::Saved => write!(f, "saved"),
            Topic::SaveRequired => write!(f, "saverequired"),
            Topic::SaveBlocked => write!(f, "saveblocked"),
            Topic::SaveBlockedField(field) => write!(f, "saveblocked: {}", field),
            Topic::NoSaveBlockersField(field) => write!(f, "nosaveblockers: {}", field),
            Topic::OkToSave => write!(f, "oktosave"),
            Topic::BlockersChanged => write!(f, "blockerschanged"),
        }
    }
}

/// Data carried along with an event.
#[derive(Clone)]
pub enum EventPayload {
    None,
    /// The resource the event is about (member added, source of `oktosave`, ...).
    Resource(Resource),
    Blocker(Blocker),
    Value(serde_json::Value),
}

#[derive(Clone)]
pub struct Event {
    pub topic: Topic,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(topic: Topic, payload: EventPayload) -> Self {
        Self { topic, payload }
    }

    pub fn bare(topic: Topic) -> Self {
        Self::new(topic, EventPayload::None)
    }

    pub fn resource(&self) -> Option<&Resource> {
        match &self.payload {
            EventPayload::Resource(resource) => Some(resource),
            EventPayload::Blocker(blocker) => Some(&blocker.resource),
            _ => None,
        }
    }

    pub fn blocker(&self) -> Option<&Blocker> {
        match &self.payload {
            EventPayload::Blocker(blocker) => Some(blocker),
            _ => None,
        }
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event").field("topic", &self.topic.to_string()).finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Callback = Rc<dyn Fn(&Event)>;

struct Subscription {
    id: ListenerId,
    topic: Topic,
    once: bool,
    callback: Callback,
}

#[derive(Default)]
pub struct EventEmitter {
    subscriptions: RefCell<Vec<Subscription>>,
    next_id: Cell<u64>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, topic: Topic, callback: impl Fn(&Event) + 'static) -> ListenerId {
        self.subscribe(topic, false, Rc::new(callback))
    }

    pub fn once(&self, topic: Topic, callback: impl Fn(&Event) + 'static) -> ListenerId {
        self.subscribe(topic, true, Rc::new(callback))
    }

    /// Removes one listener. Returns false if it was already gone.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut subscriptions = self.subscriptions.borrow_mut();
        let before = subscriptions.len();
        subscriptions.retain(|sub| sub.id != id);
        subscriptions.len() != before
    }

    pub fn off_topic(&self, topic: &Topic) {
        self.subscriptions
            .borrow_mut()
            .retain(|sub| &sub.topic != topic);
    }

    pub fn listener_count(&self, topic: &Topic) -> usize {
        self.subscriptions
            .borrow()
            .iter()
            .filter(|sub| &sub.topic == topic)
            .count()
    }

    /// Calls every listener of `event.topic` and returns how many ran.
    pub fn trigger(&self, event: &Event) -> usize {
        // Snapshot first so listeners may (un)subscribe while being dispatched.
        let callbacks: Vec<Callback> = {
            let mut subscriptions = self.subscriptions.borrow_mut();
            let matching = subscriptions
                .iter()
                .filter(|sub| sub.topic == event.topic)
                .map(|sub| sub.callback.clone())
                .collect();
            subscriptions.retain(|sub| !(sub.once && sub.topic == event.topic));
            matching
        };

        for callback in &callbacks {
            callback(event);
        }
        callbacks.len()
    }

    fn subscribe(&self, topic: Topic, once: bool, callback: Callback) -> ListenerId {
        let id = ListenerId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.subscriptions.borrow_mut().push(Subscription {
            id,
            topic,
            once,
            callback,
        });
        id
    }
}
