//! Canonical representation of a catalog listing request.
//!
//! A [`NormalizedQuery`] is produced once per inbound request from
//! [`RawQueryParams`] and is never mutated afterwards. Every set-valued filter is
//! a `BTreeSet`, so membership is deduplicated and sorted by construction and
//! `{colors: [Red, Blue]}` and `{colors: [Blue, Red]}` are the same query.

mod params;

pub use params::{QueryBuilder, RawQueryParams};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::{CatalogError, ErrorCode, Result};

/// Default number of products per page.
pub const DEFAULT_PAGE_SIZE: u32 = 24;

/// Largest page size a client may request.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Upper bound for a rating floor.
pub const MAX_RATING: f64 = 5.0;

// ═══════════════════════════════════════════════════════════════════════════════
// Sort Option
// ═══════════════════════════════════════════════════════════════════════════════

/// Sort order requested by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SortOption {
    /// Text relevance, only meaningful with a free-text query
    Relevance,
    /// Newest first (the default browse order)
    #[default]
    Recency,
    /// Product name, A to Z
    Alphabetical,
    PriceAscending,
    PriceDescending,
}

impl SortOption {
    /// Canonical wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Relevance => "relevance",
            Self::Recency => "recency",
            Self::Alphabetical => "alphabetical",
            Self::PriceAscending => "price-ascending",
            Self::PriceDescending => "price-descending",
        }
    }

    /// Parse a client-supplied sort name, accepting the legacy aliases.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "relevance" => Ok(Self::Relevance),
            "recency" | "newest" | "latest" => Ok(Self::Recency),
            "alphabetical" | "name" | "a-z" => Ok(Self::Alphabetical),
            "price-ascending" | "price_asc" | "price-asc" | "price-low" => Ok(Self::PriceAscending),
            "price-descending" | "price_desc" | "price-desc" | "price-high" => {
                Ok(Self::PriceDescending)
            }
            other => Err(CatalogError::invalid_field(
                ErrorCode::InvalidInput,
                "sort",
                format!("Unknown sort option: {}", other),
            )),
        }
    }

    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }
}

impl fmt::Display for SortOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Quick Filter
// ═══════════════════════════════════════════════════════════════════════════════

/// Predefined filter preset, distinct from user-composed criteria.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuickFilter {
    #[default]
    None,
    Deals,
    Boosted,
    Trending,
    FiveStar,
    BestSellers,
}

impl QuickFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Deals => "deals",
            Self::Boosted => "boosted",
            Self::Trending => "trending",
            Self::FiveStar => "five-star",
            Self::BestSellers => "best-sellers",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "none" | "all" => Ok(Self::None),
            "deals" | "sale" => Ok(Self::Deals),
            "boosted" | "featured" => Ok(Self::Boosted),
            "trending" => Ok(Self::Trending),
            "five-star" | "five_star" | "5star" | "5-star" => Ok(Self::FiveStar),
            "best-sellers" | "best_sellers" | "bestsellers" => Ok(Self::BestSellers),
            other => Err(CatalogError::invalid_field(
                ErrorCode::InvalidInput,
                "quickFilter",
                format!("Unknown quick filter: {}", other),
            )),
        }
    }
}

impl fmt::Display for QuickFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Category Context
// ═══════════════════════════════════════════════════════════════════════════════

/// Category / subcategory / sub-subcategory path. Each level requires its parent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryPath {
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub sub_subcategory: Option<String>,
}

/// The coarse context facets are computed for: category path and buyer category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FacetContext {
    pub category: CategoryPath,
    pub gender: Option<String>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Normalized Query
// ═══════════════════════════════════════════════════════════════════════════════

/// Canonical, validated listing request.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedQuery {
    pub category: CategoryPath,
    /// Gender / buyer-category facet
    pub gender: Option<String>,
    /// Free-text query
    pub text: Option<String>,
    pub sort: SortOption,
    /// Zero-based page index
    pub page: u32,
    pub page_size: u32,
    pub brands: BTreeSet<String>,
    pub colors: BTreeSet<String>,
    pub sub_subcategories: BTreeSet<String>,
    /// Spec attribute name -> accepted values
    pub specs: BTreeMap<String, BTreeSet<String>>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub min_rating: Option<f64>,
    pub quick_filter: QuickFilter,
}

impl NormalizedQuery {
    /// Normalize and validate raw request parameters.
    pub fn from_raw(raw: &RawQueryParams) -> Result<Self> {
        params::normalize(raw)
    }

    pub fn builder() -> QueryBuilder {
        QueryBuilder::new()
    }

    /// The facet context for this query.
    pub fn facet_context(&self) -> FacetContext {
        FacetContext {
            category: self.category.clone(),
            gender: self.gender.clone(),
        }
    }

    /// Whether any any-of set filter is present.
    pub fn has_set_filters(&self) -> bool {
        !self.brands.is_empty()
            || !self.colors.is_empty()
            || !self.sub_subcategories.is_empty()
            || self.specs.values().any(|values| !values.is_empty())
    }

    /// Rating floor after applying the five-star quick filter.
    pub fn effective_min_rating(&self) -> Option<f64> {
        match self.quick_filter {
            QuickFilter::FiveStar => Some(MAX_RATING),
            _ => self.min_rating,
        }
    }

    /// Whether any numeric range constraint is present.
    pub fn has_range_filters(&self) -> bool {
        self.min_price.is_some() || self.max_price.is_some() || self.effective_min_rating().is_some()
    }

    /// Whether a free-text query is present.
    pub fn has_text(&self) -> bool {
        self.text.is_some()
    }
}
