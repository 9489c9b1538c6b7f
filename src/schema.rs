//! The slice of schema metadata the cache needs to wire collections.
//!
//! Table and field definitions are owned by the surrounding application; the
//! cache only sees relationship descriptors.

use serde::{Deserialize, Serialize};

/// Cardinality of a relationship, seen from the table that declares it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RelationshipKind {
    ManyToOne,
    OneToMany,
    OneToOne,
    ManyToMany,
}

/// A relationship field connecting `table` to `related_table`.
///
/// For a collection, `table` is the member table and `name` is the foreign key
/// on each member that points back at the related resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub name: String,
    pub table: String,
    pub related_table: String,
    pub kind: RelationshipKind,
    /// Members are embedded in and saved with the related resource.
    #[serde(default)]
    pub dependent: bool,
    /// The relationship takes part in organizational (domain) scoping.
    #[serde(default)]
    pub domain_filter: bool,
    /// Name of the to-many field on `related_table` that holds the members.
    #[serde(default)]
    pub reverse_name: Option<String>,
}

impl Relationship {
    pub fn new(
        name: impl Into<String>,
        table: impl Into<String>,
        related_table: impl Into<String>,
        kind: RelationshipKind,
    ) -> Self {
        Self {
            name: name.into().to_lowercase(),
            table: table.into().to_lowercase(),
            related_table: related_table.into().to_lowercase(),
            kind,
            dependent: false,
            domain_filter: false,
            reverse_name: None,
        }
    }

    pub fn reverse(mut self, reverse_name: impl Into<String>) -> Self {
        self.reverse_name = Some(reverse_name.into().to_lowercase());
        self
    }

    pub fn dependent(mut self, dependent: bool) -> Self {
        self.dependent = dependent;
        self
    }

    pub fn domain_filter(mut self, domain_filter: bool) -> Self {
        self.domain_filter = domain_filter;
        self
    }

    /// Field name used as the query-parameter key when filtering by this relationship.
    pub fn filter_key(&self) -> &str {
        &self.name
    }

    /// Key under which the members appear in the related resource's payload.
    pub fn embed_key(&self) -> &str {
        self.reverse_name.as_deref().unwrap_or(&self.table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_are_lower_cased() {
        let rel = Relationship::new("CollectionObject", "Determination", "CollectionObject", RelationshipKind::ManyToOne);
        assert_eq!(rel.name, "collectionobject");
        assert_eq!(rel.table, "determination");
        assert_eq!(rel.related_table, "collectionobject");
        assert!(!rel.dependent);
        assert_eq!(rel.embed_key(), "determination");
        assert_eq!(rel.reverse("Determinations").embed_key(), "determinations");
    }

    #[test]
    fn test_deserialize_defaults() {
        let rel: Relationship = serde_json::from_str(
            r#"{"name":"agent","table":"address","related_table":"agent","kind":"many-to-one"}"#,
        )
        .unwrap();
        assert_eq!(rel.kind, RelationshipKind::ManyToOne);
        assert!(!rel.domain_filter);
    }
}
