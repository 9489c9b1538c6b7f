use crate::resource::{Resource, WeakResource};
use serde::Serialize;
use std::cell::RefCell;

/// One line of a blocker report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockerReport {
    pub table: String,
    pub cid: String,
    pub id: Option<i64>,
    pub key: String,
    pub field_name: Option<String>,
    pub reason: String,
    pub deferred: bool,
}

/// Per-session record of the resources that currently hold blockers.
#[derive(Default)]
pub struct DiagnosticContext {
    tracked: RefCell<Vec<WeakResource>>,
}

impl DiagnosticContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn track(&self, resource: &Resource) {
        let mut tracked = self.tracked.borrow_mut();
        tracked.retain(|weak| weak.upgrade().is_some());
        let known = tracked
            .iter()
            .filter_map(WeakResource::upgrade)
            .any(|existing| existing.ptr_eq(resource));
        if !known {
            tracked.push(resource.downgrade());
        }
    }

    pub(crate) fn untrack(&self, resource: &Resource) {
        self.tracked.borrow_mut().retain(|weak| match weak.upgrade() {
            Some(existing) => !existing.ptr_eq(resource),
            None => false,
        });
    }

    pub fn blocked_resources(&self) -> Vec<Resource> {
        self.tracked
            .borrow()
            .iter()
            .filter_map(WeakResource::upgrade)
            .filter(|resource| resource.save_blockers().has_blockers())
            .collect()
    }

    pub fn report(&self) -> Vec<BlockerReport> {
        self.blocked_resources()
            .iter()
            .flat_map(|resource| {
                resource
                    .save_blockers()
                    .blockers()
                    .into_iter()
                    .map(move |blocker| BlockerReport {
                        table: resource.table().to_string(),
                        cid: resource.cid().to_string(),
                        id: resource.id(),
                        key: blocker.key,
                        field_name: blocker.field_name,
                        reason: blocker.reason,
                        deferred: blocker.deferred,
                    })
            })
            .collect()
    }
}
