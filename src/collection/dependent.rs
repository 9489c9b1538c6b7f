use super::{Collection, CollectionKind};
use crate::events::{Event, EventPayload, Topic};
use crate::resource::Resource;

impl Collection {
    // Once a new related resource gets its id, every member's foreign key is
    // pointed at the related url.
    pub(super) fn watch_related_id(&self, related: &Resource) {
        if !related.is_new() {
            return;
        }
        let weak = self.downgrade();
        let id = related.once(Topic::change_of("id"), move |_| {
            if let Some(collection) = weak.upgrade() {
                collection.back_patch_foreign_keys();
            }
        });
        self.0.related_listeners.borrow_mut().push(id);
    }

    /// Points every member's foreign key at the related url.
    ///
    /// Neither the related resource nor members that were already saved are
    /// marked as needing a save by this.
    pub fn back_patch_foreign_keys(&self) {
        let (Some(field), Some(related)) = (self.0.field.as_ref(), self.related()) else {
            return;
        };
        if related.is_new() {
            return;
        }
        let url = related.url();

        self.0.suppress_save_required.set(true);
        for member in self.models() {
            let was_dirty = member.needs_save();
            member.set(&field.name, url.as_str());
            if !was_dirty {
                member.mark_saved();
            }
        }
        self.0.suppress_save_required.set(false);
    }

    pub(super) fn link_foreign_key(&self, member: &Resource) {
        let (Some(field), Some(related)) = (self.0.field.as_ref(), self.related()) else {
            return;
        };
        if !related.is_new() {
            member.set(&field.name, related.url());
        }
    }

    /// `saverequired` on the collection, then on the related resource.
    pub(super) fn notify_save_required(&self) {
        if self.0.kind != CollectionKind::Dependent || self.0.suppress_save_required.get() {
            return;
        }
        let Some(related) = self.related() else {
            return;
        };
        self.trigger(&Event::new(
            Topic::SaveRequired,
            EventPayload::Resource(related.clone()),
        ));
        related.mark_save_required();
    }
}
