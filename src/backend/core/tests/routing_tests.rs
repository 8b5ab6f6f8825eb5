//! Integration tests for backend selection.
//!
//! Tests cover:
//! - The Electronics browse scenario (primary store vs search index)
//! - Decision priority order
//! - Quick filter handling and sort precedence
//! - Idempotence of decisions and plans
//! - Clause truncation at the backend limit

use catalog_core::backend::{fields, BackendKind, FieldValue, NumericOp, SortField};
use catalog_core::query::{NormalizedQuery, RawQueryParams};
use catalog_core::routing::{effective_sort, BackendPlan, BackendRouter, RouteReason, RouterConfig};

fn normalize(pairs: &[(&str, &str)]) -> NormalizedQuery {
    NormalizedQuery::from_raw(&RawQueryParams::from_pairs(pairs.iter().copied())).unwrap()
}

fn route(pairs: &[(&str, &str)]) -> (BackendKind, RouteReason) {
    let decision = BackendRouter::default().decide(&normalize(pairs));
    (decision.backend, decision.reason)
}

// ============================================================================
// Electronics Scenario
// ============================================================================

#[test]
fn test_plain_category_browse_uses_primary_store() {
    assert_eq!(
        route(&[("category", "Electronics")]),
        (BackendKind::PrimaryStore, RouteReason::EqualityOnly)
    );
    assert_eq!(
        route(&[("category", "Electronics"), ("subcategory", "Audio")]),
        (BackendKind::PrimaryStore, RouteReason::EqualityOnly)
    );
}

#[test]
fn test_brand_filter_moves_to_search_index() {
    assert_eq!(
        route(&[("category", "Electronics"), ("brands", "Acme")]),
        (BackendKind::SearchIndex, RouteReason::SetFilters)
    );
}

#[test]
fn test_price_sort_moves_to_search_index() {
    assert_eq!(
        route(&[("category", "Electronics"), ("sort", "price-ascending")]),
        (BackendKind::SearchIndex, RouteReason::NonDefaultSort)
    );
}

#[test]
fn test_primary_plan_carries_equality_filters() {
    let router = BackendRouter::default();
    let query = normalize(&[("category", "Clothing"), ("gender", "women")]);

    let (_, plan) = router.plan(&query);
    let BackendPlan::Primary(request) = plan else {
        panic!("expected a primary-store plan");
    };
    assert!(request
        .equals
        .contains(&(fields::CATEGORY.to_string(), FieldValue::Text("Clothing".into()))));
    assert!(request
        .equals
        .contains(&(fields::GENDER.to_string(), FieldValue::Text("women".into()))));
    assert_eq!(request.sort.field, SortField::CreatedAt);
    assert!(request.page_token.is_none());
}

// ============================================================================
// Priority Order
// ============================================================================

#[test]
fn test_sort_outranks_text_and_filters() {
    let (_, reason) = route(&[
        ("q", "phone"),
        ("sort", "alphabetical"),
        ("brands", "Acme"),
        ("minPrice", "5"),
    ]);
    assert_eq!(reason, RouteReason::NonDefaultSort);
}

#[test]
fn test_text_routes_to_search_with_relevance() {
    let query = normalize(&[("q", "headphones")]);
    let router = BackendRouter::default();

    assert_eq!(router.decide(&query).reason, RouteReason::FreeText);
    assert_eq!(effective_sort(&query).field, SortField::Relevance);
}

#[test]
fn test_range_filters_route_to_search() {
    assert_eq!(
        route(&[("category", "Electronics"), ("maxPrice", "100")]).1,
        RouteReason::RangeFilters
    );
    assert_eq!(
        route(&[("category", "Electronics"), ("minRating", "4")]).1,
        RouteReason::RangeFilters
    );
}

// ============================================================================
// Quick Filters
// ============================================================================

#[test]
fn test_equality_quick_filters_stay_on_primary() {
    for preset in ["deals", "boosted"] {
        assert_eq!(
            route(&[("category", "Electronics"), ("quickFilter", preset)]).0,
            BackendKind::PrimaryStore,
            "{preset}"
        );
    }
}

#[test]
fn test_five_star_needs_range_support() {
    // The preset is a rating floor, so it routes like any range filter.
    assert_eq!(
        route(&[("category", "Electronics"), ("quickFilter", "five-star")]),
        (BackendKind::SearchIndex, RouteReason::RangeFilters)
    );

    let query = normalize(&[("quickFilter", "five-star")]);
    let request = BackendRouter::default().search_request(&query);
    assert!(request
        .numeric_filters
        .iter()
        .any(|f| f.field == fields::RATING && f.op == NumericOp::Gte && f.value == 5.0));
}

#[test]
fn test_trending_substitutes_sort_unless_sort_is_explicit() {
    let trending = normalize(&[("quickFilter", "trending")]);
    assert_eq!(effective_sort(&trending).field, SortField::TrendingScore);
    assert_eq!(
        BackendRouter::default().decide(&trending).backend,
        BackendKind::PrimaryStore
    );

    let explicit = normalize(&[("quickFilter", "trending"), ("sort", "price-descending")]);
    assert_eq!(effective_sort(&explicit).field, SortField::Price);
}

// ============================================================================
// Idempotence
// ============================================================================

#[test]
fn test_decisions_are_idempotent() {
    let router = BackendRouter::default();
    let queries = [
        normalize(&[("category", "Electronics")]),
        normalize(&[("category", "Electronics"), ("brands", "Acme,Globex")]),
        normalize(&[("q", "boots"), ("gender", "men")]),
        normalize(&[("quickFilter", "best-sellers")]),
    ];

    for query in &queries {
        let (decision, plan) = router.plan(query);
        for _ in 0..1000 {
            let (again, again_plan) = router.plan(query);
            assert_eq!(again, decision);
            assert_eq!(again_plan, plan);
        }
    }
}

// ============================================================================
// Truncation
// ============================================================================

#[test]
fn test_oversized_value_sets_are_truncated() {
    let brands: Vec<String> = (0..15).map(|i| format!("brand-{i:02}")).collect();
    let joined = brands.join(",");
    let query = normalize(&[("brands", joined.as_str())]);

    let router = BackendRouter::new(RouterConfig {
        search_max_in_values: 10,
        ..Default::default()
    });
    let request = router.search_request(&query);
    let group = request
        .facet_filter_groups
        .iter()
        .find(|g| g.field == fields::BRAND)
        .unwrap();

    assert_eq!(group.any_of.len(), 10);
    assert_eq!(group.any_of.first().map(String::as_str), Some("brand-00"));
}

#[test]
fn test_large_value_sets_normalize_and_honor_configured_limit() {
    let brands: Vec<String> = (0..60).map(|i| format!("brand-{i:02}")).collect();
    let query = NormalizedQuery::builder().brands(&brands).build().unwrap();
    assert_eq!(query.brands.len(), 60);

    let brand_group = |router: &BackendRouter| {
        let (decision, plan) = router.plan(&query);
        assert_eq!(decision.backend, BackendKind::SearchIndex);
        let BackendPlan::Search(request) = plan else {
            panic!("expected a search plan");
        };
        request
            .facet_filter_groups
            .into_iter()
            .find(|g| g.field == fields::BRAND)
            .unwrap()
    };

    let truncated = brand_group(&BackendRouter::default());
    assert_eq!(truncated.any_of.len(), 10);
    assert_eq!(truncated.any_of.last().map(String::as_str), Some("brand-09"));

    let roomy = BackendRouter::new(RouterConfig {
        search_max_in_values: 75,
        ..Default::default()
    });
    assert_eq!(brand_group(&roomy).any_of.len(), 60);
}
