//! Catalog backends.
//!
//! The service talks to two heterogeneous systems through opaque traits:
//!
//! - [`PrimaryStore`]: a document store answering equality filters with a single
//!   sort field, paginated by opaque page tokens.
//! - [`SearchIndex`]: a search engine answering free text, any-of filter groups,
//!   numeric ranges and arbitrary sorts, paginated by page index, and computing
//!   facet counts.
//!
//! [`memory::InMemoryCatalog`] implements both over a product list.

pub mod memory;

pub use memory::InMemoryCatalog;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::Result;
use crate::query::FacetContext;

/// Field names understood by both backends.
pub mod fields {
    pub const CATEGORY: &str = "category";
    pub const SUBCATEGORY: &str = "subcategory";
    pub const SUB_SUBCATEGORY: &str = "sub_subcategory";
    pub const GENDER: &str = "gender";
    pub const BRAND: &str = "brand";
    pub const COLOR: &str = "color";
    pub const ON_SALE: &str = "on_sale";
    pub const BOOSTED: &str = "boosted";
    pub const PRICE: &str = "price";
    pub const RATING: &str = "rating";
    /// Prefix of spec attribute fields (`specs.Storage`)
    pub const SPEC_PREFIX: &str = "specs.";
}

// ═══════════════════════════════════════════════════════════════════════════════
// Product
// ═══════════════════════════════════════════════════════════════════════════════

/// A catalog product as returned by either backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub name: String,
    pub brand: String,
    #[serde(default)]
    pub color: Option<String>,
    pub category: String,
    #[serde(default)]
    pub subcategory: Option<String>,
    #[serde(default)]
    pub sub_subcategory: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
    pub price: f64,
    #[serde(default)]
    pub rating: f64,
    #[serde(default)]
    pub specs: BTreeMap<String, String>,
    #[serde(default)]
    pub on_sale: bool,
    #[serde(default)]
    pub boosted: bool,
    #[serde(default)]
    pub sales_count: u64,
    #[serde(default)]
    pub trending_score: f64,
    pub created_at: DateTime<Utc>,
}

impl Product {
    /// Value of a filterable field, rendered as text.
    pub fn field(&self, name: &str) -> Option<FieldValue> {
        if let Some(spec) = name.strip_prefix(fields::SPEC_PREFIX) {
            return self.specs.get(spec).cloned().map(FieldValue::Text);
        }
        match name {
            fields::CATEGORY => Some(FieldValue::Text(self.category.clone())),
            fields::SUBCATEGORY => self.subcategory.clone().map(FieldValue::Text),
            fields::SUB_SUBCATEGORY => self.sub_subcategory.clone().map(FieldValue::Text),
            fields::GENDER => self.gender.clone().map(FieldValue::Text),
            fields::BRAND => Some(FieldValue::Text(self.brand.clone())),
            fields::COLOR => self.color.clone().map(FieldValue::Text),
            fields::ON_SALE => Some(FieldValue::Bool(self.on_sale)),
            fields::BOOSTED => Some(FieldValue::Bool(self.boosted)),
            _ => None,
        }
    }

    /// Value of a numeric field.
    pub fn number(&self, name: &str) -> Option<f64> {
        match name {
            fields::PRICE => Some(self.price),
            fields::RATING => Some(self.rating),
            _ => None,
        }
    }
}

/// A scalar value used in equality filters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Bool(bool),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Bool(b) => write!(f, "{}", b),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Sorting
// ═══════════════════════════════════════════════════════════════════════════════

/// Field a backend sorts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    CreatedAt,
    Name,
    Price,
    SalesCount,
    TrendingScore,
    /// Text relevance; only the search index ranks by it
    Relevance,
}

impl SortField {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreatedAt => "created_at",
            Self::Name => "name",
            Self::Price => "price",
            Self::SalesCount => "sales_count",
            Self::TrendingScore => "trending_score",
            Self::Relevance => "relevance",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

/// A single sort instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortKey {
    pub field: SortField,
    pub direction: SortDirection,
}

impl SortKey {
    pub const fn asc(field: SortField) -> Self {
        Self {
            field,
            direction: SortDirection::Asc,
        }
    }

    pub const fn desc(field: SortField) -> Self {
        Self {
            field,
            direction: SortDirection::Desc,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Primary Store
// ═══════════════════════════════════════════════════════════════════════════════

/// Query understood by the primary document store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimaryQuery {
    /// Conjunctive equality filters
    pub equals: Vec<(String, FieldValue)>,
    pub sort: SortKey,
    /// Opaque token where the page starts; `None` for the first page
    pub page_token: Option<String>,
    pub limit: u32,
}

/// One page from the primary store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimaryPage {
    pub items: Vec<Product>,
    /// Token of the following page, absent on the last page
    pub next_page_token: Option<String>,
}

/// Primary document store.
#[async_trait]
pub trait PrimaryStore: Send + Sync {
    /// Run one paginated query.
    async fn query(&self, query: &PrimaryQuery) -> Result<PrimaryPage>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// Search Index
// ═══════════════════════════════════════════════════════════════════════════════

/// Products must match at least one of `any_of` on `field`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterGroup {
    pub field: String,
    pub any_of: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NumericOp {
    Gte,
    Lte,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericFilter {
    pub field: String,
    pub op: NumericOp,
    pub value: f64,
}

impl NumericFilter {
    pub fn matches(&self, actual: f64) -> bool {
        match self.op {
            NumericOp::Gte => actual >= self.value,
            NumericOp::Lte => actual <= self.value,
        }
    }
}

/// Query understood by the search index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub text: Option<String>,
    /// Conjunction of disjunctive groups
    pub facet_filter_groups: Vec<FilterGroup>,
    pub numeric_filters: Vec<NumericFilter>,
    pub sort: SortKey,
    pub page: u32,
    pub page_size: u32,
}

/// One page of search hits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchPage {
    pub hits: Vec<Product>,
    pub page: u32,
    pub total_pages: u32,
    pub total_hits: u64,
}

/// A facet value and how many products carry it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacetValue {
    pub value: String,
    pub count: u64,
}

/// Field name to value counts.
pub type FacetSummary = BTreeMap<String, Vec<FacetValue>>;

/// Secondary search index.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn search(&self, request: &SearchRequest) -> Result<SearchPage>;

    /// Facet counts for every product in the category context.
    async fn fetch_facets(&self, context: &FacetContext) -> Result<FacetSummary>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// Backend Kind
// ═══════════════════════════════════════════════════════════════════════════════

/// Which backend answered a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    PrimaryStore,
    SearchIndex,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PrimaryStore => "primary_store",
            Self::SearchIndex => "search_index",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
