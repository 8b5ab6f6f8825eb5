//! Backend selection for catalog queries.
//!
//! Picks which backend answers a normalized query and translates the query into
//! that backend's request shape. Decisions are pure functions of the query and
//! the primary store's capability table, checked in priority order:
//!
//! 1. A non-default sort goes to the search index.
//! 2. Free text goes to the search index.
//! 3. Any set filter or numeric range goes to the search index.
//! 4. A quick filter the primary store cannot express goes to the search index.
//! 5. Everything else is answered by the primary store.

pub mod capability;

pub use capability::{BackendCapabilities, FieldCapability};

use metrics::counter;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::warn;

use crate::backend::{
    fields, BackendKind, FieldValue, FilterGroup, NumericFilter, NumericOp, PrimaryQuery,
    SearchRequest, SortField, SortKey,
};
use crate::query::{NormalizedQuery, QuickFilter, SortOption};

/// Router configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Largest any-of value set per search-index clause. The primary store
    /// takes single-valued equality only, so set filters never reach it.
    #[serde(default = "default_max_in_values")]
    pub search_max_in_values: usize,

    /// Most pages walked forward to find a primary-store page token
    #[serde(default = "default_max_page_walk")]
    pub max_page_walk: u32,

    /// Listings whose page tokens are remembered
    #[serde(default = "default_page_token_listings")]
    pub page_token_listings: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            search_max_in_values: default_max_in_values(),
            max_page_walk: default_max_page_walk(),
            page_token_listings: default_page_token_listings(),
        }
    }
}

fn default_max_in_values() -> usize {
    10
}

fn default_max_page_walk() -> u32 {
    10
}

fn default_page_token_listings() -> usize {
    10_000
}

// ═══════════════════════════════════════════════════════════════════════════════
// Decisions
// ═══════════════════════════════════════════════════════════════════════════════

/// Why a backend was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteReason {
    NonDefaultSort,
    FreeText,
    SetFilters,
    RangeFilters,
    UnsupportedQuickFilter,
    EqualityOnly,
}

impl RouteReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NonDefaultSort => "non_default_sort",
            Self::FreeText => "free_text",
            Self::SetFilters => "set_filters",
            Self::RangeFilters => "range_filters",
            Self::UnsupportedQuickFilter => "unsupported_quick_filter",
            Self::EqualityOnly => "equality_only",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteDecision {
    pub backend: BackendKind,
    pub reason: RouteReason,
}

/// A backend-specific request ready to execute.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendPlan {
    Primary(PrimaryQuery),
    Search(SearchRequest),
}

impl BackendPlan {
    pub fn backend(&self) -> BackendKind {
        match self {
            Self::Primary(_) => BackendKind::PrimaryStore,
            Self::Search(_) => BackendKind::SearchIndex,
        }
    }
}

/// What a quick filter needs from a backend.
#[derive(Debug, Clone, PartialEq)]
enum QuickRequirement {
    Equality(&'static str, FieldValue),
    Sort(SortField),
    /// Rating floor expressed as a range filter
    Floor(&'static str),
}

// ═══════════════════════════════════════════════════════════════════════════════
// Router
// ═══════════════════════════════════════════════════════════════════════════════

/// Chooses a backend and builds its request.
pub struct BackendRouter {
    primary: BackendCapabilities,
    config: RouterConfig,
}

impl BackendRouter {
    pub fn new(config: RouterConfig) -> Self {
        Self {
            primary: BackendCapabilities::primary_store(),
            config,
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Pick the backend for `query`.
    pub fn decide(&self, query: &NormalizedQuery) -> RouteDecision {
        let search = |reason| RouteDecision {
            backend: BackendKind::SearchIndex,
            reason,
        };

        if !query.sort.is_default() {
            return search(RouteReason::NonDefaultSort);
        }
        if query.has_text() && !self.primary.text_search {
            return search(RouteReason::FreeText);
        }
        if query.has_set_filters() {
            return search(RouteReason::SetFilters);
        }
        if query.has_range_filters() {
            return search(RouteReason::RangeFilters);
        }
        if let Some(requirement) = quick_requirement(query) {
            let supported = match &requirement {
                QuickRequirement::Equality(field, _) => self.primary.supports_equality(field),
                QuickRequirement::Sort(field) => self.primary.supports_sort(*field),
                QuickRequirement::Floor(field) => self.primary.supports_range(field),
            };
            if !supported {
                return search(RouteReason::UnsupportedQuickFilter);
            }
        }

        RouteDecision {
            backend: BackendKind::PrimaryStore,
            reason: RouteReason::EqualityOnly,
        }
    }

    /// Decide and build the request for the chosen backend.
    pub fn plan(&self, query: &NormalizedQuery) -> (RouteDecision, BackendPlan) {
        let decision = self.decide(query);
        counter!(
            "catalog_route_decisions_total",
            "backend" => decision.backend.as_str(),
            "reason" => decision.reason.as_str(),
        )
        .increment(1);

        let plan = match decision.backend {
            BackendKind::PrimaryStore => BackendPlan::Primary(self.primary_query(query)),
            BackendKind::SearchIndex => BackendPlan::Search(self.search_request(query)),
        };
        (decision, plan)
    }

    /// Primary-store request for the first page of `query`.
    pub fn primary_query(&self, query: &NormalizedQuery) -> PrimaryQuery {
        let path = &query.category;
        let mut equals: Vec<(String, FieldValue)> = [
            (fields::CATEGORY, &path.category),
            (fields::SUBCATEGORY, &path.subcategory),
            (fields::SUB_SUBCATEGORY, &path.sub_subcategory),
            (fields::GENDER, &query.gender),
        ]
        .into_iter()
        .filter_map(|(field, value)| {
            value
                .as_ref()
                .map(|v| (field.to_string(), FieldValue::Text(v.clone())))
        })
        .collect();

        if let Some(QuickRequirement::Equality(field, value)) = quick_requirement(query) {
            equals.push((field.to_string(), value));
        }

        PrimaryQuery {
            equals,
            sort: effective_sort(query),
            page_token: None,
            limit: query.page_size,
        }
    }

    /// Search-index request for `query`. Valid for any query, whatever `decide` says.
    pub fn search_request(&self, query: &NormalizedQuery) -> SearchRequest {
        let path = &query.category;
        let mut groups = Vec::new();

        for (field, value) in [
            (fields::CATEGORY, &path.category),
            (fields::SUBCATEGORY, &path.subcategory),
            (fields::SUB_SUBCATEGORY, &path.sub_subcategory),
            (fields::GENDER, &query.gender),
        ] {
            if let Some(v) = value {
                groups.push(FilterGroup {
                    field: field.to_string(),
                    any_of: vec![v.clone()],
                });
            }
        }

        let limit = self.config.search_max_in_values;
        for (field, values) in [
            (fields::BRAND.to_string(), &query.brands),
            (fields::COLOR.to_string(), &query.colors),
            (fields::SUB_SUBCATEGORY.to_string(), &query.sub_subcategories),
        ] {
            if !values.is_empty() {
                groups.push(clause(field, values, limit));
            }
        }
        for (name, values) in query.specs.iter().filter(|(_, v)| !v.is_empty()) {
            groups.push(clause(format!("{}{}", fields::SPEC_PREFIX, name), values, limit));
        }

        let mut numeric_filters = Vec::new();
        let mut floor = |field: &str, op, value: Option<f64>| {
            if let Some(value) = value {
                numeric_filters.push(NumericFilter {
                    field: field.to_string(),
                    op,
                    value,
                });
            }
        };
        floor(fields::PRICE, NumericOp::Gte, query.min_price);
        floor(fields::PRICE, NumericOp::Lte, query.max_price);
        floor(fields::RATING, NumericOp::Gte, query.effective_min_rating());

        if let Some(QuickRequirement::Equality(field, value)) = quick_requirement(query) {
            groups.push(FilterGroup {
                field: field.to_string(),
                any_of: vec![value.to_string()],
            });
        }

        SearchRequest {
            text: query.text.clone(),
            facet_filter_groups: groups,
            numeric_filters,
            sort: effective_sort(query),
            page: query.page,
            page_size: query.page_size,
        }
    }
}

impl Default for BackendRouter {
    fn default() -> Self {
        Self::new(RouterConfig::default())
    }
}

/// Build an any-of clause, keeping the first `limit` sorted values.
fn clause(field: String, values: &BTreeSet<String>, limit: usize) -> FilterGroup {
    if values.len() > limit {
        warn!(
            field = %field,
            requested = values.len(),
            kept = limit,
            "Filter value set truncated to backend clause limit"
        );
        counter!("catalog_filter_truncations_total", "field" => field.clone()).increment(1);
    }
    FilterGroup {
        any_of: values.iter().take(limit).cloned().collect(),
        field,
    }
}

fn quick_requirement(query: &NormalizedQuery) -> Option<QuickRequirement> {
    match query.quick_filter {
        QuickFilter::None => None,
        QuickFilter::Deals => Some(QuickRequirement::Equality(
            fields::ON_SALE,
            FieldValue::Bool(true),
        )),
        QuickFilter::Boosted => Some(QuickRequirement::Equality(
            fields::BOOSTED,
            FieldValue::Bool(true),
        )),
        // Sort-based presets yield to an explicit sort.
        QuickFilter::Trending if query.sort.is_default() => {
            Some(QuickRequirement::Sort(SortField::TrendingScore))
        }
        QuickFilter::BestSellers if query.sort.is_default() => {
            Some(QuickRequirement::Sort(SortField::SalesCount))
        }
        QuickFilter::Trending | QuickFilter::BestSellers => None,
        QuickFilter::FiveStar => Some(QuickRequirement::Floor(fields::RATING)),
    }
}

/// Backend sort for `query` after quick-filter substitution.
pub fn effective_sort(query: &NormalizedQuery) -> SortKey {
    if let Some(QuickRequirement::Sort(field)) = quick_requirement(query) {
        return SortKey::desc(field);
    }
    match query.sort {
        SortOption::Relevance => SortKey::desc(SortField::Relevance),
        SortOption::Recency => SortKey::desc(SortField::CreatedAt),
        SortOption::Alphabetical => SortKey::asc(SortField::Name),
        SortOption::PriceAscending => SortKey::asc(SortField::Price),
        SortOption::PriceDescending => SortKey::desc(SortField::Price),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> BackendRouter {
        BackendRouter::default()
    }

    #[test]
    fn test_category_browse_uses_primary_store() {
        let query = NormalizedQuery::builder().category("Electronics").build().unwrap();
        let decision = router().decide(&query);

        assert_eq!(decision.backend, BackendKind::PrimaryStore);
        assert_eq!(decision.reason, RouteReason::EqualityOnly);
    }

    #[test]
    fn test_priority_order() {
        let query = NormalizedQuery::builder()
            .text("phone")
            .sort("price-asc")
            .colors(["Red"])
            .build()
            .unwrap();
        assert_eq!(router().decide(&query).reason, RouteReason::NonDefaultSort);

        let query = NormalizedQuery::builder()
            .text("phone")
            .sort("recency")
            .colors(["Red"])
            .build()
            .unwrap();
        assert_eq!(router().decide(&query).reason, RouteReason::FreeText);

        let query = NormalizedQuery::builder().price_range(None, Some(100.0)).build().unwrap();
        assert_eq!(router().decide(&query).reason, RouteReason::RangeFilters);
    }

    #[test]
    fn test_quick_filters_against_capabilities() {
        for (preset, backend) in [
            ("deals", BackendKind::PrimaryStore),
            ("boosted", BackendKind::PrimaryStore),
            ("trending", BackendKind::PrimaryStore),
            ("best-sellers", BackendKind::PrimaryStore),
            ("five-star", BackendKind::SearchIndex),
        ] {
            let query = NormalizedQuery::builder()
                .category("Electronics")
                .quick_filter(preset)
                .build()
                .unwrap();
            assert_eq!(router().decide(&query).backend, backend, "preset {preset}");
        }
    }

    #[test]
    fn test_explicit_sort_beats_quick_filter_sort() {
        let query = NormalizedQuery::builder()
            .quick_filter("best-sellers")
            .build()
            .unwrap();
        assert_eq!(effective_sort(&query), SortKey::desc(SortField::SalesCount));

        let query = NormalizedQuery::builder()
            .quick_filter("best-sellers")
            .sort("price-desc")
            .build()
            .unwrap();
        assert_eq!(effective_sort(&query), SortKey::desc(SortField::Price));
        assert_eq!(router().decide(&query).backend, BackendKind::SearchIndex);
    }

    #[test]
    fn test_primary_plan_carries_equality_filters() {
        let query = NormalizedQuery::builder()
            .category("Clothing")
            .gender("women")
            .quick_filter("deals")
            .build()
            .unwrap();
        let (_, plan) = router().plan(&query);

        let BackendPlan::Primary(primary) = plan else {
            panic!("expected primary plan");
        };
        assert!(primary
            .equals
            .contains(&(fields::ON_SALE.to_string(), FieldValue::Bool(true))));
        assert!(primary
            .equals
            .contains(&(fields::GENDER.to_string(), FieldValue::Text("women".into()))));
        assert_eq!(primary.limit, query.page_size);
    }

    #[test]
    fn test_search_plan_truncates_large_sets() {
        let brands: Vec<String> = (0..15).map(|i| format!("Brand{:02}", i)).collect();
        let query = NormalizedQuery::builder().brands(&brands).build().unwrap();
        let request = router().search_request(&query);

        let group = request
            .facet_filter_groups
            .iter()
            .find(|g| g.field == fields::BRAND)
            .unwrap();
        assert_eq!(group.any_of.len(), 10);
        assert_eq!(group.any_of[0], "Brand00");
        assert_eq!(group.any_of[9], "Brand09");
    }
}
