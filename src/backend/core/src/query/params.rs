//! Raw request parameters and their normalization.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::{
    CategoryPath, NormalizedQuery, QuickFilter, SortOption, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE,
    MAX_RATING,
};
use crate::error::{CatalogError, ErrorCode, Result};

/// Longest accepted free-text query.
const MAX_TEXT_LEN: usize = 200;

/// Query-string prefix for spec attribute filters (`spec.Storage=128GB,256GB`).
const SPEC_PREFIX: &str = "spec.";

/// Request parameters exactly as the client sent them.
///
/// Every field is an optional string; list-valued fields are comma-separated.
/// Empty strings are treated the same as missing parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawQueryParams {
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub sub_subcategory: Option<String>,
    pub gender: Option<String>,
    #[serde(alias = "query")]
    pub q: Option<String>,
    pub sort: Option<String>,
    pub page: Option<String>,
    #[serde(alias = "limit")]
    pub page_size: Option<String>,
    pub brands: Option<String>,
    pub colors: Option<String>,
    pub sub_subcategories: Option<String>,
    /// Spec attribute name -> comma-separated values
    pub specs: BTreeMap<String, String>,
    pub min_price: Option<String>,
    pub max_price: Option<String>,
    pub min_rating: Option<String>,
    pub quick_filter: Option<String>,
}

impl RawQueryParams {
    /// Build from decoded query-string pairs. Repeated list parameters are merged,
    /// `spec.<name>` parameters become spec filters, unknown names are ignored.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut raw = Self::default();
        for (key, value) in pairs {
            let key = key.as_ref();
            let value = value.into();
            if let Some(name) = key.strip_prefix(SPEC_PREFIX) {
                merge_list(raw.specs.entry(name.to_string()).or_default(), value);
                continue;
            }
            let slot = match key {
                "category" => &mut raw.category,
                "subcategory" => &mut raw.subcategory,
                "subSubcategory" => &mut raw.sub_subcategory,
                "gender" => &mut raw.gender,
                "q" | "query" => &mut raw.q,
                "sort" => &mut raw.sort,
                "page" => &mut raw.page,
                "pageSize" | "limit" => &mut raw.page_size,
                "minPrice" => &mut raw.min_price,
                "maxPrice" => &mut raw.max_price,
                "minRating" => &mut raw.min_rating,
                "quickFilter" => &mut raw.quick_filter,
                "brands" | "colors" | "subSubcategories" => {
                    let list = match key {
                        "brands" => &mut raw.brands,
                        "colors" => &mut raw.colors,
                        _ => &mut raw.sub_subcategories,
                    };
                    merge_list(list.get_or_insert_with(String::new), value);
                    continue;
                }
                _ => continue,
            };
            *slot = Some(value);
        }
        raw
    }
}

fn merge_list(target: &mut String, value: String) {
    if !target.is_empty() {
        target.push(',');
    }
    target.push_str(&value);
}

// ═══════════════════════════════════════════════════════════════════════════════
// Normalization
// ═══════════════════════════════════════════════════════════════════════════════

pub(super) fn normalize(raw: &RawQueryParams) -> Result<NormalizedQuery> {
    let category = CategoryPath {
        category: text(&raw.category),
        subcategory: text(&raw.subcategory),
        sub_subcategory: text(&raw.sub_subcategory),
    };
    if category.subcategory.is_some() && category.category.is_none() {
        return Err(CatalogError::invalid_field(
            ErrorCode::InvalidInput,
            "subcategory",
            "subcategory requires category",
        ));
    }
    if category.sub_subcategory.is_some() && category.subcategory.is_none() {
        return Err(CatalogError::invalid_field(
            ErrorCode::InvalidInput,
            "subSubcategory",
            "subSubcategory requires subcategory",
        ));
    }

    let free_text = text(&raw.q);
    if let Some(ref q) = free_text {
        if q.chars().count() > MAX_TEXT_LEN {
            return Err(CatalogError::invalid_field(
                ErrorCode::InvalidInput,
                "q",
                format!("q must be at most {} characters", MAX_TEXT_LEN),
            ));
        }
    }

    // Without an explicit sort, text searches rank by relevance and browsing by recency.
    let sort = match text(&raw.sort) {
        Some(s) => SortOption::parse(&s)?,
        None if free_text.is_some() => SortOption::Relevance,
        None => SortOption::default(),
    };

    let page = match text(&raw.page) {
        Some(p) => p.parse::<u32>().map_err(|_| {
            CatalogError::invalid_field(
                ErrorCode::InvalidFormat,
                "page",
                "page must be a non-negative integer",
            )
        })?,
        None => 0,
    };

    let page_size = match text(&raw.page_size) {
        Some(s) => {
            let size = s.parse::<u32>().map_err(|_| {
                CatalogError::invalid_field(
                    ErrorCode::InvalidFormat,
                    "pageSize",
                    "pageSize must be a positive integer",
                )
            })?;
            if size == 0 || size > MAX_PAGE_SIZE {
                return Err(CatalogError::invalid_field(
                    ErrorCode::InvalidRange,
                    "pageSize",
                    format!("pageSize must be between 1 and {}", MAX_PAGE_SIZE),
                ));
            }
            size
        }
        None => DEFAULT_PAGE_SIZE,
    };

    let min_price = number(&raw.min_price, "minPrice")?;
    let max_price = number(&raw.max_price, "maxPrice")?;
    if let (Some(min), Some(max)) = (min_price, max_price) {
        if min > max {
            return Err(CatalogError::invalid_field(
                ErrorCode::InvalidRange,
                "minPrice",
                "minPrice must not exceed maxPrice",
            )
            .with_context("min_price", min)
            .with_context("max_price", max));
        }
    }

    let min_rating = number(&raw.min_rating, "minRating")?;
    if min_rating.is_some_and(|r| r > MAX_RATING) {
        return Err(CatalogError::invalid_field(
            ErrorCode::InvalidRange,
            "minRating",
            format!("minRating must be between 0 and {}", MAX_RATING),
        ));
    }

    let quick_filter = match text(&raw.quick_filter) {
        Some(s) => QuickFilter::parse(&s)?,
        None => QuickFilter::None,
    };

    let mut specs = BTreeMap::new();
    for (name, values) in &raw.specs {
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        let values = set(&Some(values.clone()));
        if !values.is_empty() {
            specs.insert(name.to_string(), values);
        }
    }

    Ok(NormalizedQuery {
        category,
        gender: text(&raw.gender),
        text: free_text,
        sort,
        page,
        page_size,
        brands: set(&raw.brands),
        colors: set(&raw.colors),
        sub_subcategories: set(&raw.sub_subcategories),
        specs,
        min_price,
        max_price,
        min_rating,
        quick_filter,
    })
}

/// Trimmed text; empty collapses to `None`.
fn text(raw: &Option<String>) -> Option<String> {
    raw.as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn number(raw: &Option<String>, field: &'static str) -> Result<Option<f64>> {
    let Some(s) = text(raw) else {
        return Ok(None);
    };
    match s.parse::<f64>() {
        // `-0` and `0` must produce the same cache key.
        Ok(n) if n.is_finite() && n >= 0.0 => Ok(Some(n + 0.0)),
        _ => Err(CatalogError::invalid_field(
            ErrorCode::InvalidFormat,
            field,
            format!("{} must be a non-negative number", field),
        )),
    }
}

/// Comma-separated members, trimmed and deduplicated. Oversized sets are
/// truncated by the router against the target backend's limit.
fn set(raw: &Option<String>) -> BTreeSet<String> {
    raw.as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════════
// Builder
// ═══════════════════════════════════════════════════════════════════════════════

/// Builder producing a [`NormalizedQuery`] through the same normalization path
/// as inbound requests.
#[derive(Debug, Default)]
pub struct QueryBuilder {
    raw: RawQueryParams,
}

impl QueryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.raw.category = Some(category.into());
        self
    }

    pub fn subcategory(mut self, subcategory: impl Into<String>) -> Self {
        self.raw.subcategory = Some(subcategory.into());
        self
    }

    pub fn sub_subcategory(mut self, sub_subcategory: impl Into<String>) -> Self {
        self.raw.sub_subcategory = Some(sub_subcategory.into());
        self
    }

    pub fn gender(mut self, gender: impl Into<String>) -> Self {
        self.raw.gender = Some(gender.into());
        self
    }

    pub fn text(mut self, q: impl Into<String>) -> Self {
        self.raw.q = Some(q.into());
        self
    }

    pub fn sort(mut self, sort: impl Into<String>) -> Self {
        self.raw.sort = Some(sort.into());
        self
    }

    pub fn page(mut self, page: u32) -> Self {
        self.raw.page = Some(page.to_string());
        self
    }

    pub fn page_size(mut self, page_size: u32) -> Self {
        self.raw.page_size = Some(page_size.to_string());
        self
    }

    pub fn brands<I, S>(mut self, brands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.raw.brands = Some(join(brands));
        self
    }

    pub fn colors<I, S>(mut self, colors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.raw.colors = Some(join(colors));
        self
    }

    pub fn sub_subcategories<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.raw.sub_subcategories = Some(join(values));
        self
    }

    pub fn spec<I, S>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.raw.specs.insert(name.into(), join(values));
        self
    }

    pub fn price_range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.raw.min_price = min.map(|v| v.to_string());
        self.raw.max_price = max.map(|v| v.to_string());
        self
    }

    pub fn min_rating(mut self, rating: f64) -> Self {
        self.raw.min_rating = Some(rating.to_string());
        self
    }

    pub fn quick_filter(mut self, quick_filter: impl Into<String>) -> Self {
        self.raw.quick_filter = Some(quick_filter.into());
        self
    }

    /// The raw parameters accumulated so far.
    pub fn raw(&self) -> &RawQueryParams {
        &self.raw
    }

    pub fn build(self) -> Result<NormalizedQuery> {
        normalize(&self.raw)
    }
}

fn join<I, S>(values: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    values
        .into_iter()
        .map(|v| v.as_ref().to_string())
        .collect::<Vec<_>>()
        .join(",")
}
