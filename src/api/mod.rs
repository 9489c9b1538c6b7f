//! REST contracts consumed by resources and collections.

pub mod envelope;
pub mod memory;
pub mod query;
pub mod transport;

pub use envelope::{ListEnvelope, ListMeta};
pub use memory::{InMemoryTransport, RequestRecord};
pub use query::{Filters, QueryParams};
pub use transport::{HttpTransport, Transport};
