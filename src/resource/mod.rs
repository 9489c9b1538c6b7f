//! Mutable, event-emitting handles to database rows.

mod persistence;

pub use persistence::SaveOutcome;

use crate::blockers::{PropagationEdge, PropagationEdges, SaveBlockers, propagation};
use crate::collection::Collection;
use crate::events::{Event, EventEmitter, EventPayload, ListenerId, Topic};
use crate::session::Session;
use serde_json::{Map, Value};
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

/// Shared handle to one row. Clones refer to the same resource.
#[derive(Clone)]
pub struct Resource(pub(crate) Rc<ResourceInner>);

/// Non-owning handle, used for every back-reference in the resource graph.
#[derive(Clone, Default)]
pub struct WeakResource(Weak<ResourceInner>);

pub(crate) struct ResourceInner {
    table: String,
    cid: String,
    session: Session,
    state: RefCell<ResourceState>,
    events: EventEmitter,
    save_blockers: SaveBlockers,
    edges: RefCell<PropagationEdges>,
    // To-many collections serialized into this resource's save payload.
    embedded: RefCell<Vec<(String, Collection)>>,
    // Resources whose structural parent is this one.
    children: RefCell<Vec<WeakResource>>,
}

struct ResourceState {
    id: Option<i64>,
    fields: Map<String, Value>,
    needs_save: bool,
}

impl Resource {
    pub(crate) fn new(session: &Session, table: &str, id: Option<i64>) -> Self {
        let inner = Rc::new_cyclic(|weak: &Weak<ResourceInner>| ResourceInner {
            table: table.to_lowercase(),
            cid: format!("c{}", uuid::Uuid::new_v4().simple()),
            session: session.clone(),
            state: RefCell::new(ResourceState {
                id,
                fields: Map::new(),
                needs_save: false,
            }),
            events: EventEmitter::new(),
            save_blockers: SaveBlockers::new(WeakResource(weak.clone())),
            edges: RefCell::new(PropagationEdges::default()),
            embedded: RefCell::new(Vec::new()),
            children: RefCell::new(Vec::new()),
        });
        Self(inner)
    }

    pub fn downgrade(&self) -> WeakResource {
        WeakResource(Rc::downgrade(&self.0))
    }

    pub fn ptr_eq(&self, other: &Resource) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn table(&self) -> &str {
        &self.0.table
    }

    /// Client-side identifier, stable for the lifetime of the handle.
    pub fn cid(&self) -> &str {
        &self.0.cid
    }

    pub fn id(&self) -> Option<i64> {
        self.0.state.borrow().id
    }

    pub fn is_new(&self) -> bool {
        self.id().is_none()
    }

    pub fn session(&self) -> &Session {
        &self.0.session
    }

    /// `<api_root>/<table>/<id>/`, or the table endpoint while unpersisted.
    pub fn url(&self) -> String {
        let base = self.0.session.table_url(&self.0.table);
        match self.id() {
            Some(id) => format!("{}{}/", base, id),
            None => base,
        }
    }

    pub fn get(&self, field: &str) -> Option<Value> {
        let field = field.to_lowercase();
        let state = self.0.state.borrow();
        if field == "id" {
            return state.id.map(Value::from);
        }
        state.fields.get(&field).cloned()
    }

    pub fn fields(&self) -> Map<String, Value> {
        self.0.state.borrow().fields.clone()
    }

    /// Sets one field, emitting `change:<field>` and `change` when the value differs.
    pub fn set(&self, field: &str, value: impl Into<Value>) {
        let field = field.to_lowercase();
        let value = value.into();
        if field == "id" {
            if let Some(id) = value.as_i64() {
                self.set_id(id);
            }
            return;
        }

        let changed = {
            let mut state = self.0.state.borrow_mut();
            if state.fields.get(&field) == Some(&value) {
                false
            } else {
                state.fields.insert(field.clone(), value.clone());
                true
            }
        };
        if !changed {
            return;
        }

        self.trigger(&Event::new(Topic::ChangeField(field), EventPayload::Value(value)));
        self.trigger(&Event::new(Topic::Change, EventPayload::Resource(self.clone())));
        self.mark_save_required();
    }

    /// Assigns the persisted id, emitting `change:id` and `change`.
    pub fn set_id(&self, id: i64) {
        {
            let mut state = self.0.state.borrow_mut();
            if state.id == Some(id) {
                return;
            }
            state.id = Some(id);
        }
        self.trigger(&Event::new(Topic::change_of("id"), EventPayload::Value(Value::from(id))));
        self.trigger(&Event::new(Topic::Change, EventPayload::Resource(self.clone())));
    }

    /// Overwrites fields from a server row without emitting events.
    pub(crate) fn apply_server_fields(&self, row: Map<String, Value>) {
        let mut state = self.0.state.borrow_mut();
        for (key, value) in row {
            let key = key.to_lowercase();
            if key == "id" {
                if let Some(id) = value.as_i64() {
                    state.id = Some(id);
                }
                continue;
            }
            state.fields.insert(key, value);
        }
    }

    pub fn needs_save(&self) -> bool {
        self.0.state.borrow().needs_save
    }

    pub(crate) fn mark_save_required(&self) {
        self.0.state.borrow_mut().needs_save = true;
        self.trigger(&Event::new(Topic::SaveRequired, EventPayload::Resource(self.clone())));
    }

    pub(crate) fn mark_saved(&self) {
        self.0.state.borrow_mut().needs_save = false;
    }

    pub fn on(&self, topic: Topic, callback: impl Fn(&Event) + 'static) -> ListenerId {
        self.0.events.on(topic, callback)
    }

    pub fn once(&self, topic: Topic, callback: impl Fn(&Event) + 'static) -> ListenerId {
        self.0.events.once(topic, callback)
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.0.events.off(id)
    }

    /// Dispatches an event to local listeners, then along the propagation edges
    /// for the blocker topics.
    pub fn trigger(&self, event: &Event) {
        self.dispatch(event, &mut Vec::new());
    }

    pub(crate) fn dispatch(&self, event: &Event, trail: &mut Vec<String>) {
        self.0.events.trigger(event);
        propagation::after_dispatch(self, event, trail);
    }

    pub fn save_blockers(&self) -> &SaveBlockers {
        &self.0.save_blockers
    }

    pub fn parent(&self) -> Option<Resource> {
        self.0.edges.borrow().parent()
    }

    pub(crate) fn set_parent(&self, parent: &Resource) {
        self.0.edges.borrow_mut().set_parent(parent);
        let mut children = parent.0.children.borrow_mut();
        children.retain(|child| child.upgrade().is_some());
        children.push(self.downgrade());
    }

    /// Live resources created under this one with `Session::create_child`.
    pub fn children(&self) -> Vec<Resource> {
        self.0
            .children
            .borrow()
            .iter()
            .filter_map(WeakResource::upgrade)
            .collect()
    }

    pub(crate) fn attach_to_collection(&self, field: &str, related: &Resource) {
        self.0.edges.borrow_mut().set_collection(field, related);
    }

    pub(crate) fn detach_from_collection(&self) {
        self.0.edges.borrow_mut().clear_collection();
    }

    /// Resources that re-emit this resource's `saveblocked` / `oktosave`.
    pub fn propagation_edges(&self) -> Vec<PropagationEdge> {
        self.0.edges.borrow().edges()
    }

    pub(crate) fn propagation_targets(&self) -> Vec<Resource> {
        self.0.edges.borrow().targets()
    }

    pub(crate) fn embed(&self, key: &str, collection: &Collection) {
        let mut embedded = self.0.embedded.borrow_mut();
        embedded.retain(|(existing, _)| existing != key);
        embedded.push((key.to_string(), collection.clone()));
    }

    /// The collection serialized under `key` in this resource's payload.
    pub fn embedded_collection(&self, key: &str) -> Option<Collection> {
        let key = key.to_lowercase();
        self.0
            .embedded
            .borrow()
            .iter()
            .find(|(existing, _)| *existing == key)
            .map(|(_, collection)| collection.clone())
    }

    pub fn embedded_collections(&self) -> Vec<(String, Collection)> {
        self.0.embedded.borrow().clone()
    }

    /// Save payload: own fields plus every embedded collection.
    pub fn to_api_json(&self) -> crate::Result<Map<String, Value>> {
        let mut json = self.fields();
        if let Some(id) = self.id() {
            json.insert("id".to_string(), Value::from(id));
        }
        for (key, collection) in self.embedded_collections() {
            json.insert(key, collection.to_api_json()?.into_value());
        }
        Ok(json)
    }
}

impl WeakResource {
    pub fn upgrade(&self) -> Option<Resource> {
        self.0.upgrade().map(Resource)
    }
}

impl PartialEq for Resource {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Resource {}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("table", &self.0.table)
            .field("cid", &self.0.cid)
            .field("id", &self.id())
            .finish()
    }
}

impl fmt::Debug for WeakResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(resource) => write!(f, "WeakResource({:?})", resource),
            None => write!(f, "WeakResource(dropped)"),
        }
    }
}
