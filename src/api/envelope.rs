use crate::core::{CacheError, Result};
use log::warn;
use serde::Deserialize;
use serde_json::Value;

/// `meta` block of a list response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ListMeta {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
    pub total_count: usize,
}

/// A parsed list response: `{ "objects": [...], "meta": {...} }`.
#[derive(Debug, Clone, PartialEq)]
pub struct ListEnvelope {
    pub objects: Vec<Value>,
    pub meta: ListMeta,
    /// The server omitted `meta`; `total_count` was inferred from the payload length.
    ///
    /// Collections absorbing a degraded page record their member count as the
    /// total instead. The two agree on a first page; on a later page the
    /// member count includes the rows already loaded.
    pub degraded: bool,
}

impl ListEnvelope {
    /// Parses a list payload.
    ///
    /// With `legacy` set, a payload without `meta` is accepted as the complete
    /// object list and a warning is logged. Without it that payload is rejected.
    pub fn parse(payload: Value, legacy: bool) -> Result<Self> {
        match payload {
            Value::Object(mut map) if map.contains_key("meta") => {
                let meta: ListMeta = serde_json::from_value(map.remove("meta").unwrap_or_default())
                    .map_err(|e| CacheError::InvalidResponse(format!("bad 'meta' block: {}", e)))?;
                let objects = match map.remove("objects") {
                    Some(Value::Array(objects)) => objects,
                    Some(_) => {
                        return Err(CacheError::InvalidResponse(
                            "'objects' is not an array".to_string(),
                        ));
                    }
                    None => Vec::new(),
                };
                Ok(Self {
                    objects,
                    meta,
                    degraded: false,
                })
            }
            Value::Object(mut map) => match map.remove("objects") {
                Some(Value::Array(objects)) => Self::degraded(objects, legacy),
                _ => Err(CacheError::InvalidResponse(
                    "list response has neither 'meta' nor 'objects'".to_string(),
                )),
            },
            Value::Array(objects) => Self::degraded(objects, legacy),
            other => Err(CacheError::InvalidResponse(format!(
                "expected a list response, got {}",
                other
            ))),
        }
    }

    fn degraded(objects: Vec<Value>, legacy: bool) -> Result<Self> {
        if !legacy {
            return Err(CacheError::InvalidResponse(
                "expected 'meta' in list response".to_string(),
            ));
        }
        warn!("expected 'meta' in list response; treating payload as the complete list");
        let total_count = objects.len();
        Ok(Self {
            objects,
            meta: ListMeta {
                limit: None,
                offset: None,
                total_count,
            },
            degraded: true,
        })
    }

    pub fn total_count(&self) -> usize {
        self.meta.total_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_with_meta() {
        let envelope = ListEnvelope::parse(
            json!({
                "objects": [{"id": 1}, {"id": 2}],
                "meta": {"limit": 2, "offset": 0, "total_count": 5}
            }),
            true,
        )
        .unwrap();

        assert_eq!(envelope.objects.len(), 2);
        assert_eq!(envelope.total_count(), 5);
        assert!(!envelope.degraded);
    }

    #[test]
    fn test_bare_array_is_degraded() {
        let envelope = ListEnvelope::parse(json!([{"id": 1}, {"id": 2}, {"id": 3}]), true).unwrap();
        assert!(envelope.degraded);
        assert_eq!(envelope.total_count(), 3);
    }

    #[test]
    fn test_bare_array_rejected_without_legacy() {
        let err = ListEnvelope::parse(json!([{"id": 1}]), false).unwrap_err();
        assert!(matches!(err, CacheError::InvalidResponse(_)));
    }

    #[test]
    fn test_scalar_rejected() {
        assert!(ListEnvelope::parse(json!(42), true).is_err());
        assert!(ListEnvelope::parse(json!({"total": 3}), true).is_err());
    }
}
