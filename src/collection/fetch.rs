use super::{Collection, CollectionKind};
use crate::api::{Filters, ListEnvelope, QueryParams};
use crate::core::{CacheError, Result};
use futures::future::{self, FutureExt, LocalBoxFuture, Shared};
use log::{debug, error, warn};
use serde_json::Value;

/// The single pending fetch of a collection. Every caller awaiting it sees the
/// same result.
pub type FetchFuture = Shared<LocalBoxFuture<'static, Result<Collection>>>;

#[derive(Debug, Clone, Copy, Default)]
pub struct FetchOptions {
    /// Page size override for paginated collections.
    pub limit: Option<usize>,
    /// Positional insert of the fetched rows. Not supported; must stay `None`.
    pub at: Option<usize>,
}

impl Collection {
    /// Fetches the next page (Lazy, ToOne) or the whole related set (Independent).
    ///
    /// While a fetch is pending, further calls return that same future and no
    /// new request is issued. Dependent collections resolve immediately.
    pub fn fetch(&self) -> FetchFuture {
        self.start_fetch(FetchOptions::default())
    }

    pub fn fetch_with(&self, options: FetchOptions) -> Result<FetchFuture> {
        if let Some(at) = options.at {
            return Err(CacheError::UnsupportedOperation(format!(
                "positional fetch (at = {}) into {}",
                at,
                self.describe()
            )));
        }
        Ok(self.start_fetch(options))
    }

    /// The pending fetch, if one is in flight.
    pub fn in_flight(&self) -> Option<FetchFuture> {
        self.0
            .state
            .borrow()
            .pending
            .as_ref()
            .filter(|pending| pending.peek().is_none())
            .cloned()
    }

    pub fn is_fetching(&self) -> bool {
        self.in_flight().is_some()
    }

    /// Aborts the pending fetch; its awaiters get `FetchCancelled` and no
    /// member is materialized from it. Returns false if nothing was in flight.
    pub fn cancel_fetch(&self) -> bool {
        let (abort, pending) = {
            let mut state = self.0.state.borrow_mut();
            (state.abort.take(), state.pending.take())
        };
        match abort {
            Some(handle) if pending.as_ref().is_some_and(|pending| pending.peek().is_none()) => {
                debug!("cancelling fetch of {}", self.describe());
                handle.abort();
                true
            }
            _ => false,
        }
    }

    /// Fetches only when nothing was fetched yet.
    pub async fn fetch_if_not_populated(&self) -> Result<Collection> {
        let populated = self.0.kind == CollectionKind::Dependent || !self.0.state.borrow().never_fetched;
        if populated && !self.is_fetching() {
            return Ok(self.clone());
        }
        self.fetch().await
    }

    /// The server-side total, fetching first if it is not known yet.
    pub async fn get_total_count(&self) -> Result<usize> {
        if let Some(total) = self.total_count() {
            return Ok(total);
        }
        let collection = self.fetch_if_not_populated().await?;
        Ok(collection.total_count().unwrap_or_else(|| collection.len()))
    }

    fn start_fetch(&self, options: FetchOptions) -> FetchFuture {
        if let Some(pending) = self.in_flight() {
            return pending;
        }
        if self.0.kind == CollectionKind::Dependent {
            return self.ready();
        }

        let related = self.related();
        if self.0.field.is_some() && related.is_none() {
            // Without the related id the request would be unfiltered.
            debug!("not fetching {}: related resource was dropped", self.describe());
            return future::ready(Err::<Collection, _>(CacheError::Discarded(self.describe())))
                .boxed_local()
                .shared();
        }
        if let Some(related) = related.as_ref().filter(|related| related.is_new()) {
            if self.0.kind == CollectionKind::ToOne {
                error!(
                    "can't fetch {} of an unpersisted {}",
                    self.describe(),
                    related.table()
                );
            } else {
                debug!("skipping fetch of {}: related resource is new", self.describe());
            }
            return self.ready();
        }

        match self.0.kind {
            CollectionKind::Lazy | CollectionKind::ToOne if self.is_complete() => {
                warn!("fetching an already complete {}", self.describe());
                return self.ready();
            }
            CollectionKind::Independent if !self.0.state.borrow().never_fetched => {
                return self.ready();
            }
            _ => {}
        }

        let params = self.query_params(options, related.and_then(|related| related.id()));
        let future = self.request(params);
        self.0.state.borrow_mut().pending = Some(future.clone());
        future
    }

    fn query_params(&self, options: FetchOptions, related_id: Option<i64>) -> QueryParams {
        let state = self.0.state.borrow();
        let mut relationship = Filters::new();
        if let (Some(field), Some(id)) = (self.0.field.as_ref(), related_id) {
            relationship.insert(field.filter_key(), Value::from(id));
        }

        let mut params = QueryParams::new(state.filters.merged(&relationship));
        if state.domain_filter {
            params = params.domain_filter(true);
        }
        // limit=0 asks for every row.
        let limit = match self.0.kind {
            CollectionKind::Independent => 0,
            CollectionKind::ToOne => 1,
            _ => options.limit.unwrap_or(self.0.session.config().page_size),
        };
        params.limit(limit).offset(state.members.len())
    }

    fn request(&self, params: QueryParams) -> FetchFuture {
        let transport = self.0.session.transport();
        let legacy = self.0.session.config().legacy_list_responses;
        let url = self.url();
        let weak = self.downgrade();
        let description = self.describe();

        let body = async move {
            let payload = transport.get(&url, &params).await?;
            let envelope = ListEnvelope::parse(payload, legacy)?;
            let Some(collection) = weak.upgrade() else {
                debug!("discarding fetched page of dropped {}", description);
                return Err(CacheError::Discarded(description));
            };
            collection.absorb_page(envelope)?;
            Ok(collection)
        };
        let (body, handle) = future::abortable(body);
        self.0.state.borrow_mut().abort = Some(handle);

        let weak = self.downgrade();
        let description = self.describe();
        body.map(move |outcome| match outcome {
            Ok(result) => {
                // The settled future holds a strong handle; the slot must not keep it.
                // A cancelled fetch already left the slot, which may hold a newer one.
                if let Some(collection) = weak.upgrade() {
                    let mut state = collection.0.state.borrow_mut();
                    state.pending = None;
                    state.abort = None;
                }
                result
            }
            Err(future::Aborted) => Err(CacheError::FetchCancelled(description)),
        })
        .boxed_local()
        .shared()
    }

    fn ready(&self) -> FetchFuture {
        future::ready(Ok(self.clone())).boxed_local().shared()
    }

    /// Appends one page of rows. Rows whose id is already a member update
    /// that member in place.
    fn absorb_page(&self, envelope: ListEnvelope) -> Result<()> {
        for row in envelope.objects {
            let id = row.get("id").and_then(Value::as_i64);
            match id.and_then(|id| self.get_by_id(id)) {
                Some(existing) => {
                    if let Value::Object(row) = row {
                        existing.apply_server_fields(row);
                    }
                }
                None => {
                    let resource = self.0.session.from_row(&self.0.table, row)?;
                    self.insert_member(resource, true)?;
                }
            }
        }

        let mut state = self.0.state.borrow_mut();
        state.never_fetched = false;
        // Degraded pages count materialized members, which is the payload
        // length on a first page.
        let total = if envelope.degraded {
            state.members.len()
        } else {
            envelope.meta.total_count
        };
        state.total_count = Some(match self.0.kind {
            CollectionKind::ToOne => total.min(1),
            _ => total,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::schema::{Relationship, RelationshipKind};
    use crate::session::Session;
    use serde_json::json;

    #[test]
    fn test_lazy_pages_until_complete() {
        let (session, server) = Session::in_memory(CacheConfig::default().page_size(2)).unwrap();
        for n in 0..5 {
            server.insert("locality", json!({"localityname": format!("site {}", n)}));
        }
        let collection = Collection::lazy(&session, "locality", Filters::new());

        tokio_test::block_on(async {
            for expected in [2, 4, 5] {
                assert!(!collection.is_complete());
                collection.fetch().await.unwrap();
                assert_eq!(collection.len(), expected);
            }
        });
        assert!(collection.is_complete());
        assert_eq!(collection.total_count(), Some(5));

        let offsets: Vec<_> = server
            .requests()
            .into_iter()
            .map(|request| request.query.into_iter().find(|(key, _)| key == "offset"))
            .collect();
        assert_eq!(
            offsets,
            vec![
                Some(("offset".to_string(), "0".to_string())),
                Some(("offset".to_string(), "2".to_string())),
                Some(("offset".to_string(), "4".to_string())),
            ]
        );

        // Complete: no further request.
        tokio_test::block_on(collection.fetch()).unwrap();
        assert_eq!(server.request_count(), 3);
    }

    #[test]
    fn test_positional_fetch_is_rejected() {
        let (session, _) = Session::in_memory(CacheConfig::default()).unwrap();
        let collection = Collection::lazy(&session, "locality", Filters::new());
        let err = collection
            .fetch_with(FetchOptions { limit: None, at: Some(3) })
            .unwrap_err();
        assert!(matches!(err, CacheError::UnsupportedOperation(_)));
    }

    #[test]
    fn test_to_one_of_new_related_is_noop() {
        let (session, server) = Session::in_memory(CacheConfig::default()).unwrap();
        let agent = session.create("agent");
        let field = Relationship::new("agent", "address", "agent", RelationshipKind::OneToOne);
        let collection = Collection::to_one("address", &agent, field).unwrap();

        let fetched = tokio_test::block_on(collection.fetch()).unwrap();
        assert!(fetched.ptr_eq(&collection));
        assert!(collection.is_empty());
        assert_eq!(server.request_count(), 0);
    }

    #[test]
    fn test_dropped_related_fetches_nothing() {
        let (session, server) = Session::in_memory(CacheConfig::default()).unwrap();
        for agent in [9, 10, 11] {
            server.insert("address", json!({"agent": format!("/api/specify/agent/{}/", agent)}));
        }
        let agent = session.resource_with_id("agent", 9);
        let field = Relationship::new("agent", "address", "agent", RelationshipKind::ManyToOne);
        let collection = Collection::lazy_related("address", &agent, field, Filters::new()).unwrap();
        drop(agent);

        let err = tokio_test::block_on(collection.fetch()).unwrap_err();
        assert!(matches!(err, CacheError::Discarded(_)));
        assert!(collection.is_empty());
        assert_eq!(server.request_count(), 0);
    }

    #[test]
    fn test_to_one_holds_at_most_one_member() {
        let (session, server) = Session::in_memory(CacheConfig::default()).unwrap();
        server.insert("address", json!({"agent": "/api/specify/agent/9/", "city": "Lawrence"}));
        server.insert("address", json!({"agent": "/api/specify/agent/9/", "city": "Topeka"}));
        let agent = session.resource_with_id("agent", 9);
        let field = Relationship::new("agent", "address", "agent", RelationshipKind::OneToOne);
        let collection = Collection::to_one("address", &agent, field).unwrap();

        tokio_test::block_on(collection.fetch()).unwrap();
        assert_eq!(collection.len(), 1);
        assert!(collection.is_complete());
        assert!(server.requests()[0].query.contains(&("limit".to_string(), "1".to_string())));

        tokio_test::block_on(collection.fetch()).unwrap();
        assert_eq!(collection.len(), 1);
        assert_eq!(server.request_count(), 1);
    }

    #[test]
    fn test_relationship_filter_and_domain_flag() {
        let (session, server) = Session::in_memory(CacheConfig::default()).unwrap();
        let agent = session.resource_with_id("agent", 9);
        server.insert("address", json!({"agent": "/api/specify/agent/9/", "city": "Lawrence"}));
        server.insert("address", json!({"agent": "/api/specify/agent/10/", "city": "Topeka"}));
        let field = Relationship::new("agent", "address", "agent", RelationshipKind::ManyToOne)
            .domain_filter(true);
        let collection = Collection::lazy_related("address", &agent, field, Filters::new()).unwrap();

        tokio_test::block_on(collection.fetch()).unwrap();
        assert_eq!(collection.len(), 1);
        assert_eq!(collection.at(0).unwrap().get("city"), Some(json!("Lawrence")));

        let query = &server.requests()[0].query;
        assert!(query.contains(&("agent".to_string(), "9".to_string())));
        assert!(query.contains(&("domainfilter".to_string(), "true".to_string())));
    }
}
