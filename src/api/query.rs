use serde_json::Value;
use std::collections::BTreeMap;

/// Query-parameter filters of a list request, keyed by lower-cased field name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filters(BTreeMap<String, Value>);

impl Filters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.to_lowercase(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(&key.to_lowercase())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(&key.to_lowercase())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Overlays `other` on top of `self`; keys in `other` win.
    pub fn merged(&self, other: &Filters) -> Filters {
        let mut merged = self.clone();
        for (key, value) in other.iter() {
            merged.0.insert(key.clone(), value.clone());
        }
        merged
    }
}

/// Filter and pagination descriptor of one list request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryParams {
    pub filters: Filters,
    pub domain_filter: Option<bool>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl QueryParams {
    pub fn new(filters: Filters) -> Self {
        Self {
            filters,
            ..Self::default()
        }
    }

    pub fn domain_filter(mut self, enabled: bool) -> Self {
        self.domain_filter = Some(enabled);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Parameters in wire order: filters by name, then `domainfilter`, `limit`, `offset`.
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = self
            .filters
            .iter()
            .map(|(key, value)| (key.clone(), render_value(value)))
            .collect();

        if let Some(domain_filter) = self.domain_filter {
            pairs.push(("domainfilter".to_string(), domain_filter.to_string()));
        }
        if let Some(limit) = self.limit {
            pairs.push(("limit".to_string(), limit.to_string()));
        }
        if let Some(offset) = self.offset {
            pairs.push(("offset".to_string(), offset.to_string()));
        }
        pairs
    }

    /// URL-encoded query string, without the leading `?`.
    pub fn to_query_string(&self) -> String {
        let mut url = match reqwest::Url::parse("http://query.invalid/") {
            Ok(url) => url,
            Err(_) => return String::new(),
        };
        url.query_pairs_mut().extend_pairs(self.to_pairs());
        url.query().unwrap_or_default().to_string()
    }
}

pub(crate) fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_order() {
        let params = QueryParams::new(Filters::new().with("Zeta", 1).with("alpha", "x y"))
            .domain_filter(false)
            .limit(20)
            .offset(40);

        assert_eq!(
            params.to_pairs(),
            vec![
                ("alpha".to_string(), "x y".to_string()),
                ("zeta".to_string(), "1".to_string()),
                ("domainfilter".to_string(), "false".to_string()),
                ("limit".to_string(), "20".to_string()),
                ("offset".to_string(), "40".to_string()),
            ]
        );
        assert_eq!(
            params.to_query_string(),
            "alpha=x+y&zeta=1&domainfilter=false&limit=20&offset=40"
        );
    }

    #[test]
    fn test_merged_overrides() {
        let base = Filters::new().with("collectionobject", 3).with("isprimary", true);
        let merged = base.merged(&Filters::new().with("CollectionObject", 9));
        assert_eq!(merged.get("collectionobject"), Some(&Value::from(9)));
        assert_eq!(merged.get("isprimary"), Some(&Value::from(true)));
    }
}
