use std::collections::HashMap;

/// Which members of an independent collection changed since the last serialization.
#[derive(Debug, Default)]
pub(super) struct ChangeTracker {
    changed: HashMap<String, bool>,
}

impl ChangeTracker {
    pub fn record(&mut self, cid: &str, changed: bool) {
        self.changed.insert(cid.to_string(), changed);
    }

    pub fn mark(&mut self, cid: &str) {
        self.changed.insert(cid.to_string(), true);
    }

    pub fn forget(&mut self, cid: &str) {
        self.changed.remove(cid);
    }

    pub fn is_changed(&self, cid: &str) -> bool {
        self.changed.get(cid).copied().unwrap_or(false)
    }

    pub fn reset(&mut self) {
        for changed in self.changed.values_mut() {
            *changed = false;
        }
    }
}
