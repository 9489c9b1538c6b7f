use crate::resource::Resource;
use std::fmt;

/// A named reason preventing a save, as seen from outside `SaveBlockers`.
#[derive(Clone)]
pub struct Blocker {
    pub resource: Resource,
    pub key: String,
    /// Lower-cased field name; `None` blocks the whole resource.
    pub field_name: Option<String>,
    pub reason: String,
    /// Not surfaced until a save attempt.
    pub deferred: bool,
}

impl Blocker {
    pub fn is_on_field(&self, field_name: &str) -> bool {
        self.field_name
            .as_deref()
            .is_some_and(|name| name.eq_ignore_ascii_case(field_name))
    }
}

impl fmt::Debug for Blocker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Blocker")
            .field("resource", &self.resource)
            .field("key", &self.key)
            .field("field_name", &self.field_name)
            .field("reason", &self.reason)
            .field("deferred", &self.deferred)
            .finish()
    }
}

// Stored form; the owning resource is implied by the `SaveBlockers` holding it.
#[derive(Debug, Clone)]
pub(crate) struct BlockerEntry {
    pub key: String,
    pub field_name: Option<String>,
    pub reason: String,
    pub deferred: bool,
}

impl BlockerEntry {
    pub fn to_blocker(&self, resource: &Resource) -> Blocker {
        Blocker {
            resource: resource.clone(),
            key: self.key.clone(),
            field_name: self.field_name.clone(),
            reason: self.reason.clone(),
            deferred: self.deferred,
        }
    }

    pub fn is_on_field(&self, field_name: &str) -> bool {
        self.field_name
            .as_deref()
            .is_some_and(|name| name.eq_ignore_ascii_case(field_name))
    }
}
