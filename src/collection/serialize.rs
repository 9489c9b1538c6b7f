use super::{Collection, CollectionKind};
use crate::core::{CacheError, Result};
use serde_json::{Map, Value};

/// How a collection appears in its related resource's save payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiJson {
    /// The collection endpoint; nothing was loaded or changed.
    Url(String),
    Items(Vec<ApiItem>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ApiItem {
    /// Reference to an unchanged, persisted member.
    Url(String),
    Json(Map<String, Value>),
}

impl ApiJson {
    pub fn into_value(self) -> Value {
        match self {
            ApiJson::Url(url) => Value::String(url),
            ApiJson::Items(items) => Value::Array(items.into_iter().map(ApiItem::into_value).collect()),
        }
    }
}

impl ApiItem {
    pub fn into_value(self) -> Value {
        match self {
            ApiItem::Url(url) => Value::String(url),
            ApiItem::Json(json) => Value::Object(json),
        }
    }

    pub fn is_inline(&self) -> bool {
        matches!(self, ApiItem::Json(_))
    }
}

impl Collection {
    /// Serializes the collection for the related resource's payload.
    ///
    /// Dependent members are always inlined. Independent members are inlined
    /// only when new or changed since the previous call, which clears the
    /// change tracking.
    pub fn to_api_json(&self) -> Result<ApiJson> {
        match self.0.kind {
            CollectionKind::Dependent => {
                let items = self
                    .models()
                    .iter()
                    .map(|member| member.to_api_json().map(ApiItem::Json))
                    .collect::<Result<Vec<_>>>()?;
                Ok(ApiJson::Items(items))
            }
            CollectionKind::Independent => self.independent_api_json(),
            CollectionKind::Lazy | CollectionKind::ToOne => Err(CacheError::UnsupportedOperation(
                format!("to_api_json on {}", self.describe()),
            )),
        }
    }

    fn independent_api_json(&self) -> Result<ApiJson> {
        let members = self.models();
        if members.is_empty() && self.0.state.borrow().never_fetched {
            return Ok(ApiJson::Url(self.url()));
        }

        let mut items = Vec::with_capacity(members.len());
        for member in &members {
            let changed = self
                .0
                .state
                .borrow()
                .changes
                .as_ref()
                .is_some_and(|changes| changes.is_changed(member.cid()));
            if changed || member.is_new() {
                items.push(ApiItem::Json(member.to_api_json()?));
            } else {
                items.push(ApiItem::Url(member.url()));
            }
        }

        if let Some(changes) = self.0.state.borrow_mut().changes.as_mut() {
            changes.reset();
        }
        Ok(ApiJson::Items(items))
    }

    /// Applies the members part of the related resource's save response,
    /// matched by position. Reference items are skipped.
    pub(crate) fn absorb_saved_members(&self, items: Vec<Value>) -> Result<()> {
        for (member, item) in self.models().into_iter().zip(items) {
            if item.is_object() {
                member.absorb_saved(item)?;
            }
        }
        // Ids assigned by that save are not changes of their own.
        if let Some(changes) = self.0.state.borrow_mut().changes.as_mut() {
            changes.reset();
        }
        Ok(())
    }
}
