//! Collections mirroring server-side to-many relationships.
//!
//! The four variants share one base state and differ only in how they fetch,
//! report completeness and serialize into the related resource's payload.

mod dependent;
mod fetch;
mod serialize;
mod tracker;

pub use fetch::{FetchFuture, FetchOptions};
pub use serialize::{ApiItem, ApiJson};

use crate::api::Filters;
use crate::core::{CacheError, Result};
use crate::events::{Event, EventEmitter, EventPayload, ListenerId, Topic};
use crate::resource::{Resource, SaveOutcome, WeakResource};
use crate::schema::Relationship;
use crate::session::Session;
use futures::future::AbortHandle;
use serde_json::{Map, Value};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use tracker::ChangeTracker;

/// The closed set of collection variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionKind {
    /// Always fully materialized; members are saved inside the related resource.
    Dependent,
    /// Separately persisted members; changed ones are inlined in the related payload.
    Independent,
    /// Paginated, fetch-on-demand read path.
    Lazy,
    /// Lazy collection filtered to exactly one related id.
    ToOne,
}

impl CollectionKind {
    /// Members re-emit their blocker events on the related resource.
    pub fn propagates_blockers(self) -> bool {
        self == CollectionKind::Dependent
    }
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectionKind::Dependent => write!(f, "dependent"),
            CollectionKind::Independent => write!(f, "independent"),
            CollectionKind::Lazy => write!(f, "lazy"),
            CollectionKind::ToOne => write!(f, "to-one"),
        }
    }
}

/// Options of `Collection::add_with`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AddOptions {
    /// Positional insert. Not supported; must stay `None`.
    pub at: Option<usize>,
    /// Skip `add` events and dirty tracking.
    pub silent: bool,
}

/// Shared handle to a collection.
#[derive(Clone)]
pub struct Collection(Rc<CollectionInner>);

#[derive(Clone)]
pub struct WeakCollection(Weak<CollectionInner>);

struct CollectionInner {
    kind: CollectionKind,
    table: String,
    field: Option<Relationship>,
    related: Option<WeakResource>,
    session: Session,
    state: RefCell<CollectionState>,
    events: EventEmitter,
    related_listeners: RefCell<Vec<ListenerId>>,
    suppress_save_required: Cell<bool>,
}

struct CollectionState {
    members: Vec<Member>,
    filters: Filters,
    domain_filter: bool,
    total_count: Option<usize>,
    never_fetched: bool,
    pending: Option<FetchFuture>,
    abort: Option<AbortHandle>,
    // Independent only.
    changes: Option<ChangeTracker>,
}

struct Member {
    resource: Resource,
    listeners: Vec<ListenerId>,
}

impl Collection {
    /// To-many whose members are embedded in `related`'s payload.
    pub fn dependent(
        table: &str,
        related: &Resource,
        field: Relationship,
        members: Vec<Resource>,
    ) -> Result<Self> {
        validate(table, related, &field)?;
        let collection = Self::build(
            CollectionKind::Dependent,
            related.session(),
            field.table.clone(),
            Some(field),
            Some(related),
            Filters::new(),
        );
        for member in members {
            collection.insert_member(member, true)?;
        }
        collection.register_with_related(related);
        collection.watch_related_id(related);
        Ok(collection)
    }

    /// To-many of separately persisted members that `related` references.
    pub fn independent(
        table: &str,
        related: &Resource,
        field: Relationship,
        members: Vec<Resource>,
    ) -> Result<Self> {
        validate(table, related, &field)?;
        let collection = Self::build(
            CollectionKind::Independent,
            related.session(),
            field.table.clone(),
            Some(field),
            Some(related),
            Filters::new(),
        );
        for member in members {
            collection.insert_member(member, true)?;
        }
        collection.register_with_related(related);
        Ok(collection)
    }

    /// To-one relationship accessed as a collection of at most one member.
    pub fn to_one(table: &str, related: &Resource, field: Relationship) -> Result<Self> {
        validate(table, related, &field)?;
        Ok(Self::build(
            CollectionKind::ToOne,
            related.session(),
            field.table.clone(),
            Some(field),
            Some(related),
            Filters::new(),
        ))
    }

    /// Lazy, paginated collection of `table` rows matching `filters`.
    pub fn lazy(session: &Session, table: &str, filters: Filters) -> Self {
        Self::build(
            CollectionKind::Lazy,
            session,
            table.to_lowercase(),
            None,
            None,
            filters,
        )
    }

    /// Lazy, paginated view of a non-dependent to-many of `related`.
    pub fn lazy_related(
        table: &str,
        related: &Resource,
        field: Relationship,
        filters: Filters,
    ) -> Result<Self> {
        validate(table, related, &field)?;
        Ok(Self::build(
            CollectionKind::Lazy,
            related.session(),
            field.table.clone(),
            Some(field),
            Some(related),
            filters,
        ))
    }

    fn build(
        kind: CollectionKind,
        session: &Session,
        table: String,
        field: Option<Relationship>,
        related: Option<&Resource>,
        filters: Filters,
    ) -> Self {
        let domain_filter = field
            .as_ref()
            .map(|field| field.domain_filter)
            .unwrap_or(session.config().domain_filter);
        Self(Rc::new(CollectionInner {
            kind,
            table,
            field,
            related: related.map(Resource::downgrade),
            session: session.clone(),
            state: RefCell::new(CollectionState {
                members: Vec::new(),
                filters,
                domain_filter,
                total_count: None,
                never_fetched: true,
                pending: None,
                abort: None,
                changes: (kind == CollectionKind::Independent).then(ChangeTracker::default),
            }),
            events: EventEmitter::new(),
            related_listeners: RefCell::new(Vec::new()),
            suppress_save_required: Cell::new(false),
        }))
    }

    fn register_with_related(&self, related: &Resource) {
        if let Some(field) = &self.0.field {
            related.embed(field.embed_key(), self);
        }
    }

    pub fn downgrade(&self) -> WeakCollection {
        WeakCollection(Rc::downgrade(&self.0))
    }

    pub fn ptr_eq(&self, other: &Collection) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn kind(&self) -> CollectionKind {
        self.0.kind
    }

    pub fn table(&self) -> &str {
        &self.0.table
    }

    pub fn field(&self) -> Option<&Relationship> {
        self.0.field.as_ref()
    }

    pub fn related(&self) -> Option<Resource> {
        self.0.related.as_ref().and_then(WeakResource::upgrade)
    }

    pub fn session(&self) -> &Session {
        &self.0.session
    }

    /// List endpoint of the member table.
    pub fn url(&self) -> String {
        self.0.session.table_url(&self.0.table)
    }

    pub fn filters(&self) -> Filters {
        self.0.state.borrow().filters.clone()
    }

    pub fn set_filter(&self, key: &str, value: impl Into<Value>) {
        self.0.state.borrow_mut().filters.insert(key, value);
    }

    pub fn remove_filter(&self, key: &str) {
        self.0.state.borrow_mut().filters.remove(key);
    }

    pub fn domain_filter(&self) -> bool {
        self.0.state.borrow().domain_filter
    }

    pub fn len(&self) -> usize {
        self.0.state.borrow().members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Members in insertion order.
    pub fn models(&self) -> Vec<Resource> {
        self.0
            .state
            .borrow()
            .members
            .iter()
            .map(|member| member.resource.clone())
            .collect()
    }

    pub fn at(&self, index: usize) -> Option<Resource> {
        self.0
            .state
            .borrow()
            .members
            .get(index)
            .map(|member| member.resource.clone())
    }

    pub fn get_by_cid(&self, cid: &str) -> Option<Resource> {
        self.0
            .state
            .borrow()
            .members
            .iter()
            .find(|member| member.resource.cid() == cid)
            .map(|member| member.resource.clone())
    }

    pub fn get_by_id(&self, id: i64) -> Option<Resource> {
        self.0
            .state
            .borrow()
            .members
            .iter()
            .find(|member| member.resource.id() == Some(id))
            .map(|member| member.resource.clone())
    }

    pub fn contains(&self, resource: &Resource) -> bool {
        self.get_by_cid(resource.cid()).is_some()
    }

    /// Last total reported by the server (Dependent: the member count).
    pub fn total_count(&self) -> Option<usize> {
        match self.0.kind {
            CollectionKind::Dependent => Some(self.len()),
            _ => self.0.state.borrow().total_count,
        }
    }

    /// Dependent and Independent are always complete; paginated variants are
    /// complete once every row the server reported is materialized.
    pub fn is_complete(&self) -> bool {
        match self.0.kind {
            CollectionKind::Dependent | CollectionKind::Independent => true,
            CollectionKind::Lazy | CollectionKind::ToOne => {
                let state = self.0.state.borrow();
                state.total_count == Some(state.members.len())
            }
        }
    }

    pub fn on(&self, topic: Topic, callback: impl Fn(&Event) + 'static) -> ListenerId {
        self.0.events.on(topic, callback)
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.0.events.off(id)
    }

    pub fn trigger(&self, event: &Event) {
        self.0.events.trigger(event);
    }

    pub fn add(&self, resource: Resource) -> Result<()> {
        self.add_with(resource, AddOptions::default())
    }

    /// Appends a member, emitting `add` unless silent. Adding a current member is a no-op.
    pub fn add_with(&self, resource: Resource, options: AddOptions) -> Result<()> {
        if let Some(at) = options.at {
            return Err(CacheError::UnsupportedOperation(format!(
                "positional insert (at = {}) into {}",
                at,
                self.describe()
            )));
        }
        if !self.insert_member(resource.clone(), options.silent)? || options.silent {
            return Ok(());
        }

        if self.0.kind == CollectionKind::Dependent {
            self.link_foreign_key(&resource);
        }
        self.trigger(&Event::new(Topic::Add, EventPayload::Resource(resource)));
        if self.0.kind == CollectionKind::Dependent {
            self.notify_save_required();
        }
        Ok(())
    }

    /// Removes a member, emitting `remove`. Returns false if it was not a member.
    pub fn remove(&self, resource: &Resource) -> bool {
        let member = {
            let mut state = self.0.state.borrow_mut();
            let Some(index) = state
                .members
                .iter()
                .position(|member| member.resource.ptr_eq(resource))
            else {
                return false;
            };
            if let Some(changes) = state.changes.as_mut() {
                changes.forget(resource.cid());
            }
            state.members.remove(index)
        };

        for id in &member.listeners {
            resource.off(*id);
        }
        if self.0.kind.propagates_blockers() {
            resource.detach_from_collection();
            self.withdraw_blockers(resource);
        }

        self.trigger(&Event::new(Topic::Remove, EventPayload::Resource(resource.clone())));
        if self.0.kind == CollectionKind::Dependent {
            self.notify_save_required();
        }
        true
    }

    /// Not supported by Dependent collections; refetches otherwise.
    pub async fn sync(&self) -> Result<Collection> {
        if self.0.kind == CollectionKind::Dependent {
            return Err(CacheError::UnsupportedOperation(format!(
                "sync on {}",
                self.describe()
            )));
        }
        self.fetch().await
    }

    /// Creates, saves and appends a new member. Not supported by Dependent collections.
    ///
    /// The member is only appended when the save went through.
    pub async fn create(&self, fields: Map<String, Value>) -> Result<(Resource, SaveOutcome)> {
        if self.0.kind == CollectionKind::Dependent {
            return Err(CacheError::UnsupportedOperation(format!(
                "create on {}",
                self.describe()
            )));
        }
        let resource = self.0.session.create(&self.0.table);
        for (key, value) in fields {
            resource.set(&key, value);
        }
        if let (Some(field), Some(related)) = (&self.0.field, self.related()) {
            if !related.is_new() {
                resource.set(&field.name, related.url());
            }
        }

        let outcome = resource.save().await?;
        if outcome.is_saved() {
            self.add(resource.clone())?;
        }
        Ok((resource, outcome))
    }

    pub(crate) fn describe(&self) -> String {
        format!("{} {} collection", self.0.kind, self.0.table)
    }

    // Returns false when `resource` already is a member.
    fn insert_member(&self, resource: Resource, silent: bool) -> Result<bool> {
        if resource.table() != self.0.table {
            return Err(CacheError::RelationshipMismatch(format!(
                "cannot add a {} resource to {}",
                resource.table(),
                self.describe()
            )));
        }
        if self.contains(&resource) {
            return Ok(false);
        }

        let listeners = self.watch_member(&resource);
        {
            let mut state = self.0.state.borrow_mut();
            if let Some(changes) = state.changes.as_mut() {
                changes.record(resource.cid(), !silent || resource.is_new());
            }
            state.members.push(Member {
                resource: resource.clone(),
                listeners,
            });
        }

        if self.0.kind.propagates_blockers() {
            if let (Some(field), Some(related)) = (&self.0.field, self.related()) {
                resource.attach_to_collection(&field.name, &related);
                self.surface_blockers(&resource, &related);
            }
        }
        Ok(true)
    }

    fn watch_member(&self, resource: &Resource) -> Vec<ListenerId> {
        let weak = self.downgrade();
        let on_change = resource.on(Topic::Change, move |event| {
            if let (Some(collection), Some(member)) = (weak.upgrade(), event.resource()) {
                collection.member_changed(member);
            }
        });
        let weak = self.downgrade();
        let on_destroy = resource.on(Topic::Destroy, move |event| {
            if let (Some(collection), Some(member)) = (weak.upgrade(), event.resource()) {
                collection.remove(member);
            }
        });
        vec![on_change, on_destroy]
    }

    fn member_changed(&self, member: &Resource) {
        match self.0.kind {
            CollectionKind::Independent => {
                if let Some(changes) = self.0.state.borrow_mut().changes.as_mut() {
                    changes.mark(member.cid());
                }
            }
            CollectionKind::Dependent => self.notify_save_required(),
            CollectionKind::Lazy | CollectionKind::ToOne => {}
        }
    }

    // A member joining with fired blockers blocks the related resource too.
    fn surface_blockers(&self, member: &Resource, related: &Resource) {
        for blocking in member.save_blockers().blocking_resources() {
            if let Some(blocker) = blocking
                .save_blockers()
                .blockers()
                .into_iter()
                .find(|blocker| !blocker.deferred)
            {
                related.trigger(&Event::new(Topic::SaveBlocked, EventPayload::Blocker(blocker)));
            }
        }
    }

    // A member leaving takes its blockers out of the related resource's graph.
    fn withdraw_blockers(&self, member: &Resource) {
        let Some(related) = self.related() else {
            return;
        };
        for blocking in member.save_blockers().blocking_resources() {
            related.trigger(&Event::new(Topic::OkToSave, EventPayload::Resource(blocking)));
        }
    }
}

impl WeakCollection {
    pub fn upgrade(&self) -> Option<Collection> {
        self.0.upgrade().map(Collection)
    }
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("kind", &self.0.kind)
            .field("table", &self.0.table)
            .field("len", &self.len())
            .field("total_count", &self.total_count())
            .finish()
    }
}

impl Drop for CollectionInner {
    fn drop(&mut self) {
        for member in self.state.get_mut().members.drain(..) {
            for id in member.listeners {
                member.resource.off(id);
            }
        }
        if let Some(related) = self.related.as_ref().and_then(WeakResource::upgrade) {
            for id in self.related_listeners.get_mut().drain(..) {
                related.off(id);
            }
        }
    }
}

fn validate(table: &str, related: &Resource, field: &Relationship) -> Result<()> {
    let table = table.to_lowercase();
    if field.table != table {
        return Err(CacheError::RelationshipMismatch(format!(
            "field '{}' belongs to {}, not {}",
            field.name, field.table, table
        )));
    }
    if field.related_table != related.table() {
        return Err(CacheError::RelationshipMismatch(format!(
            "field '{}' points to {}, not to the related {}",
            field.name,
            field.related_table,
            related.table()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::schema::RelationshipKind;

    fn session() -> Session {
        Session::in_memory(CacheConfig::default()).unwrap().0
    }

    fn determinations() -> Relationship {
        Relationship::new(
            "collectionObject",
            "determination",
            "collectionobject",
            RelationshipKind::ManyToOne,
        )
        .dependent(true)
        .reverse("determinations")
    }

    #[test]
    fn test_mismatched_field_aborts_construction() {
        let session = session();
        let agent = session.create("agent");
        let err = Collection::dependent("determination", &agent, determinations(), vec![]).unwrap_err();
        assert!(matches!(err, CacheError::RelationshipMismatch(_)));

        let co = session.create("collectionobject");
        let err = Collection::independent("preparation", &co, determinations(), vec![]).unwrap_err();
        assert!(matches!(err, CacheError::RelationshipMismatch(_)));
    }

    #[test]
    fn test_positional_insert_is_rejected() {
        let session = session();
        let co = session.create("collectionobject");
        let collection = Collection::dependent("determination", &co, determinations(), vec![]).unwrap();
        let err = collection
            .add_with(session.create("determination"), AddOptions { at: Some(0), silent: false })
            .unwrap_err();
        assert!(matches!(err, CacheError::UnsupportedOperation(_)));
        assert!(collection.is_empty());
    }

    #[test]
    fn test_add_remove_emit_events_and_mark_related() {
        let session = session();
        let co = session.create("collectionobject");
        let collection = Collection::dependent("determination", &co, determinations(), vec![]).unwrap();
        let seen = Rc::new(RefCell::new(Vec::new()));
        for topic in [Topic::Add, Topic::Remove, Topic::SaveRequired] {
            let seen = seen.clone();
            let name = topic.to_string();
            collection.on(topic, move |_| seen.borrow_mut().push(name.clone()));
        }

        let det = session.create("determination");
        collection.add(det.clone()).unwrap();
        collection.add(det.clone()).unwrap();
        assert_eq!(collection.len(), 1);
        assert!(co.needs_save());
        assert_eq!(det.parent(), None);
        assert_eq!(det.propagation_edges().len(), 1);

        assert!(collection.remove(&det));
        assert!(!collection.remove(&det));
        assert!(det.propagation_edges().is_empty());
        assert_eq!(*seen.borrow(), vec!["add", "saverequired", "remove", "saverequired"]);
    }

    #[test]
    fn test_independent_member_blockers_stay_local() {
        let session = session();
        let co = session.resource_with_id("collectionobject", 1);
        let preparation = session.resource_with_id("preparation", 5);
        let field = Relationship::new(
            "collectionobject",
            "preparation",
            "collectionobject",
            RelationshipKind::ManyToOne,
        )
        .reverse("preparations");
        let collection =
            Collection::independent("preparation", &co, field, vec![preparation.clone()]).unwrap();

        preparation.save_blockers().add("k", None, "bad", false);
        assert!(preparation.save_blockers().is_blocked());
        assert!(!co.save_blockers().is_blocked());
        assert!(preparation.propagation_edges().is_empty());

        assert!(collection.remove(&preparation));
        assert!(!co.save_blockers().is_blocked());
    }

    #[test]
    fn test_wrong_member_table_is_rejected() {
        let session = session();
        let co = session.create("collectionobject");
        let collection = Collection::dependent("determination", &co, determinations(), vec![]).unwrap();
        assert!(matches!(
            collection.add(session.create("agent")),
            Err(CacheError::RelationshipMismatch(_))
        ));
    }

    #[test]
    fn test_dependent_and_independent_are_complete() {
        let session = session();
        let co = session.create("collectionobject");
        let dependent = Collection::dependent("determination", &co, determinations(), vec![]).unwrap();
        assert!(dependent.is_complete());
        assert_eq!(dependent.total_count(), Some(0));

        let lazy = Collection::lazy(&session, "determination", Filters::new());
        assert!(!lazy.is_complete());
        assert_eq!(lazy.total_count(), None);
    }

    #[test]
    fn test_related_embeds_collection() {
        let session = session();
        let co = session.create("collectionobject");
        let collection = Collection::dependent("determination", &co, determinations(), vec![]).unwrap();
        assert!(co.embedded_collection("determinations").unwrap().ptr_eq(&collection));
    }
}
