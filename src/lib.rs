// ============================================================================
// relcache: client-side resource cache and save-blocker consistency
// ============================================================================
//
// Resources are event-emitting handles to database rows. Collections mirror
// server-side to-many relationships of one related resource, and every
// resource owns a `SaveBlockers` registry whose state propagates up the
// resource graph.
//
// Everything is single-threaded: handles are `Rc`-based and back-references
// are weak. The only suspension points are network requests.

pub mod api;
pub mod blockers;
pub mod collection;
pub mod config;
pub mod core;
pub mod events;
pub mod resource;
pub mod schema;
pub mod session;

// Re-export main types for convenience
pub use core::{CacheError, Result};
pub use config::CacheConfig;
pub use session::Session;

pub use resource::{Resource, SaveOutcome, WeakResource};
pub use collection::{
    AddOptions, ApiItem, ApiJson, Collection, CollectionKind, FetchFuture, FetchOptions,
    WeakCollection,
};
pub use schema::{Relationship, RelationshipKind};
pub use events::{Event, EventEmitter, EventPayload, ListenerId, Topic};

pub use blockers::{
    Blocker, BlockerReport, DiagnosticContext, FieldListenerId, PropagationEdge, SaveBlockers,
};

// Re-export the REST layer
pub use api::{
    Filters, HttpTransport, InMemoryTransport, ListEnvelope, ListMeta, QueryParams,
    RequestRecord, Transport,
};
