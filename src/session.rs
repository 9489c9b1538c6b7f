use crate::api::{HttpTransport, InMemoryTransport, Transport};
use crate::blockers::DiagnosticContext;
use crate::config::CacheConfig;
use crate::core::{CacheError, Result};
use crate::resource::Resource;
use serde_json::{Map, Value};
use std::rc::Rc;

/// One client session: configuration, transport and blocker diagnostics.
///
/// Every resource created through a session keeps a handle to it. Cloning is
/// cheap and shares the same state.
#[derive(Clone)]
pub struct Session {
    inner: Rc<SessionInner>,
}

struct SessionInner {
    config: CacheConfig,
    transport: Rc<dyn Transport>,
    diagnostics: DiagnosticContext,
}

impl Session {
    pub fn new(config: CacheConfig, transport: impl Transport + 'static) -> Result<Self> {
        Self::with_transport(config, Rc::new(transport))
    }

    pub fn with_transport(config: CacheConfig, transport: Rc<dyn Transport>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Rc::new(SessionInner {
                config,
                transport,
                diagnostics: DiagnosticContext::new(),
            }),
        })
    }

    /// Session talking HTTP to the configured server.
    pub fn http(config: CacheConfig) -> Result<Self> {
        let transport = HttpTransport::new(&config)?;
        Self::new(config, transport)
    }

    /// Session over an in-process transport; the transport handle is returned for seeding.
    pub fn in_memory(config: CacheConfig) -> Result<(Self, Rc<InMemoryTransport>)> {
        let transport = Rc::new(InMemoryTransport::new(&config.api_root));
        let session = Self::with_transport(config, transport.clone())?;
        Ok((session, transport))
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn transport(&self) -> Rc<dyn Transport> {
        self.inner.transport.clone()
    }

    pub fn diagnostics(&self) -> &DiagnosticContext {
        &self.inner.diagnostics
    }

    /// List endpoint of a table: `<api_root>/<table>/`.
    pub fn table_url(&self, table: &str) -> String {
        format!("{}/{}/", self.inner.config.api_root, table.to_lowercase())
    }

    /// A new, unpersisted resource.
    pub fn create(&self, table: &str) -> Resource {
        Resource::new(self, table, None)
    }

    /// A handle to a persisted row; fields are loaded by `Resource::fetch`.
    pub fn resource_with_id(&self, table: &str, id: i64) -> Resource {
        Resource::new(self, table, Some(id))
    }

    /// A new resource structurally nested under `parent` (a to-one dependent).
    pub fn create_child(&self, table: &str, parent: &Resource) -> Resource {
        let child = Resource::new(self, table, None);
        child.set_parent(parent);
        child
    }

    /// Materializes a resource from a server row.
    pub fn from_row(&self, table: &str, row: Value) -> Result<Resource> {
        let row: Map<String, Value> = match row {
            Value::Object(map) => map,
            other => {
                return Err(CacheError::InvalidResponse(format!(
                    "expected a {} row, got {}",
                    table, other
                )));
            }
        };
        let resource = Resource::new(self, table, None);
        resource.apply_server_fields(row);
        Ok(resource)
    }

    pub fn ptr_eq(&self, other: &Session) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}
