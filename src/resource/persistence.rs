use super::Resource;
use crate::api::QueryParams;
use crate::blockers::Blocker;
use crate::core::{CacheError, Result};
use crate::events::{Event, EventPayload, Topic};
use log::debug;
use serde_json::{Map, Value};
use std::collections::HashSet;

/// Result of a save attempt.
#[derive(Debug, Clone)]
pub enum SaveOutcome {
    Saved,
    /// Nothing was sent. `blocker` is the one to report; `others` are the
    /// remaining unresolved blockers in the resource graph.
    Blocked { blocker: Blocker, others: Vec<Blocker> },
}

impl SaveOutcome {
    pub fn is_saved(&self) -> bool {
        matches!(self, SaveOutcome::Saved)
    }
}

impl Resource {
    /// Loads this resource's fields from the server.
    pub async fn fetch(&self) -> Result<Resource> {
        if self.is_new() {
            return Ok(self.clone());
        }
        let transport = self.session().transport();
        let payload = transport.get(&self.url(), &QueryParams::default()).await?;
        match payload {
            Value::Object(row) => {
                self.apply_server_fields(row);
                Ok(self.clone())
            }
            other => Err(CacheError::InvalidResponse(format!(
                "expected a {} row, got {}",
                self.table(),
                other
            ))),
        }
    }

    /// Fires deferred blockers across the embedded graph, then saves unless
    /// anything is still blocking.
    pub async fn save(&self) -> Result<SaveOutcome> {
        self.fire_deferred_blockers_deep();

        let mut pending = self.unresolved_blockers();
        if !pending.is_empty() {
            let blocker = pending.remove(0);
            for other in &pending {
                debug!(
                    "save of {} also blocked by {} {}: {}",
                    self.table(),
                    other.resource.table(),
                    other.key,
                    other.reason
                );
            }
            return Ok(SaveOutcome::Blocked {
                blocker,
                others: pending,
            });
        }

        let body = Value::Object(self.to_api_json()?);
        let transport = self.session().transport();
        let response = if self.is_new() {
            transport.post(&self.url(), &body).await?
        } else {
            transport.put(&self.url(), &body).await?
        };

        self.absorb_saved(response)?;
        self.trigger(&Event::new(Topic::Saved, EventPayload::Resource(self.clone())));
        Ok(SaveOutcome::Saved)
    }

    /// Deletes the row (when persisted) and emits `destroy`.
    pub async fn destroy(&self) -> Result<()> {
        if !self.is_new() {
            self.session().transport().delete(&self.url()).await?;
        }
        self.trigger(&Event::new(Topic::Destroy, EventPayload::Resource(self.clone())));
        Ok(())
    }

    /// Fires deferred blockers on this resource, its structural children and
    /// every member of its embedded collections, recursively.
    pub fn fire_deferred_blockers_deep(&self) {
        self.fire_deferred_within(&mut HashSet::new());
    }

    fn fire_deferred_within(&self, visited: &mut HashSet<String>) {
        if !visited.insert(self.cid().to_string()) {
            return;
        }
        self.save_blockers().fire_deferred_blockers();
        for child in self.children() {
            child.fire_deferred_within(visited);
        }
        for (_, collection) in self.embedded_collections() {
            for member in collection.models() {
                member.fire_deferred_within(visited);
            }
        }
    }

    /// Blockers of this resource and of every resource blocking it, first found first.
    pub fn unresolved_blockers(&self) -> Vec<Blocker> {
        let mut found: Vec<Blocker> = self.save_blockers().blockers();
        for resource in self.save_blockers().blocking_resources() {
            if resource.ptr_eq(self) {
                continue;
            }
            for blocker in resource.save_blockers().blockers() {
                let duplicate = found
                    .iter()
                    .any(|seen| seen.resource.ptr_eq(&blocker.resource) && seen.key == blocker.key);
                if !duplicate {
                    found.push(blocker);
                }
            }
        }
        found
    }

    /// Applies a save response: embedded members first, then own fields, then the id.
    pub(crate) fn absorb_saved(&self, response: Value) -> Result<()> {
        let mut row: Map<String, Value> = match response {
            Value::Object(row) => row,
            Value::Null => Map::new(),
            other => {
                return Err(CacheError::InvalidResponse(format!(
                    "expected a {} row in save response, got {}",
                    self.table(),
                    other
                )));
            }
        };

        let id = row.remove("id").and_then(|id| id.as_i64());
        for (key, collection) in self.embedded_collections() {
            if let Some(Value::Array(items)) = row.remove(&key) {
                collection.absorb_saved_members(items)?;
            }
        }
        self.apply_server_fields(row);

        if let Some(id) = id {
            self.set_id(id);
        }
        self.mark_saved();
        Ok(())
    }
}
