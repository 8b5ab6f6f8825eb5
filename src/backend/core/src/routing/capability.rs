//! Declared query capabilities of the primary store.
//!
//! The search index accepts every filter, sort and text query; only the
//! primary store is restricted, so only it carries a table.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::backend::{fields, SortField};

/// What a backend can do with one field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldCapability {
    /// Exact-match filtering
    pub equality: bool,
    /// `>=` / `<=` filtering
    pub range: bool,
    pub sortable: bool,
}

impl FieldCapability {
    pub const fn equality() -> Self {
        Self {
            equality: true,
            range: false,
            sortable: false,
        }
    }

    pub const fn sort() -> Self {
        Self {
            equality: false,
            range: false,
            sortable: true,
        }
    }
}

/// Capability table for one backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendCapabilities {
    pub fields: HashMap<String, FieldCapability>,
    pub text_search: bool,
}

impl BackendCapabilities {
    /// Primary document store: equality on the category path, buyer category and
    /// merchandising flags; one sort field at a time; no ranges, no text.
    pub fn primary_store() -> Self {
        let mut fields = HashMap::new();
        for field in [
            fields::CATEGORY,
            fields::SUBCATEGORY,
            fields::SUB_SUBCATEGORY,
            fields::GENDER,
            fields::ON_SALE,
            fields::BOOSTED,
        ] {
            fields.insert(field.to_string(), FieldCapability::equality());
        }
        for sort in [
            SortField::CreatedAt,
            SortField::SalesCount,
            SortField::TrendingScore,
        ] {
            fields.insert(sort.as_str().to_string(), FieldCapability::sort());
        }

        Self {
            fields,
            text_search: false,
        }
    }

    fn capability(&self, field: &str) -> FieldCapability {
        self.fields.get(field).copied().unwrap_or_default()
    }

    pub fn supports_equality(&self, field: &str) -> bool {
        self.capability(field).equality
    }

    pub fn supports_range(&self, field: &str) -> bool {
        self.capability(field).range
    }

    pub fn supports_sort(&self, field: SortField) -> bool {
        self.capability(field.as_str()).sortable
    }
}
