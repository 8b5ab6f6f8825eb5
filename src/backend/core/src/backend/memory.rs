//! In-memory catalog implementing both backend traits.
//!
//! Used by the server binary when no external backends are wired in, and by the
//! integration tests to exercise the full request path.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

use super::{
    fields, FacetSummary, FacetValue, FieldValue, PrimaryPage, PrimaryQuery, PrimaryStore,
    Product, SearchIndex, SearchPage, SearchRequest, SortDirection, SortField, SortKey,
};
use crate::error::{CatalogError, ErrorContext, Result};
use crate::query::FacetContext;

/// Product list shared by both backend implementations.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    products: RwLock<Vec<Product>>,
}

impl InMemoryCatalog {
    pub fn new(products: Vec<Product>) -> Self {
        Self {
            products: RwLock::new(products),
        }
    }

    /// Load a JSON array of products.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .context(format!("Failed to read catalog seed {}", path.display()))?;
        let products: Vec<Product> = serde_json::from_str(&raw)?;
        info!(path = %path.display(), products = products.len(), "Loaded catalog seed");
        Ok(Self::new(products))
    }

    /// A deterministic demo catalog spanning a few categories.
    pub fn sample() -> Self {
        const LAYOUT: &[(&str, &str, &[&str])] = &[
            ("Electronics", "Phones", &["Smartphones", "Accessories"]),
            ("Electronics", "Laptops", &["Ultrabooks", "Gaming"]),
            ("Electronics", "Audio", &["Headphones", "Speakers"]),
            ("Clothing", "Shoes", &["Sneakers", "Boots"]),
            ("Clothing", "Shirts", &["T-Shirts", "Polos"]),
        ];
        const BRANDS: &[&str] = &["Acme", "Globex", "Initech", "Umbrella", "Soylent", "Hooli"];
        const COLORS: &[&str] = &["Black", "White", "Red", "Blue", "Green"];
        const GENDERS: &[&str] = &["men", "women", "unisex"];
        const BASE_TS: i64 = 1_704_067_200;

        let mut products = Vec::new();
        let mut n: usize = 0;
        for (category, subcategory, leaves) in LAYOUT {
            for leaf in leaves.iter() {
                for _ in 0..12 {
                    let brand = BRANDS[n % BRANDS.len()];
                    let mut specs = BTreeMap::new();
                    if *category == "Electronics" {
                        specs.insert("Storage".to_string(), format!("{}GB", 64 << (n % 4)));
                    } else {
                        specs.insert("Size".to_string(), ["S", "M", "L", "XL"][n % 4].to_string());
                    }
                    products.push(Product {
                        id: format!("p-{:04}", n),
                        name: format!("{} {} {}", brand, leaf, n),
                        brand: brand.to_string(),
                        color: Some(COLORS[n % COLORS.len()].to_string()),
                        category: category.to_string(),
                        subcategory: Some(subcategory.to_string()),
                        sub_subcategory: Some(leaf.to_string()),
                        gender: (*category == "Clothing").then(|| GENDERS[n % 3].to_string()),
                        price: 10.0 + ((n * 37) % 500) as f64,
                        rating: 1.0 + ((n * 7) % 5) as f64,
                        specs,
                        on_sale: n % 5 == 0,
                        boosted: n % 11 == 0,
                        sales_count: ((n * 53) % 1000) as u64,
                        trending_score: ((n * 29) % 100) as f64 / 10.0,
                        created_at: DateTime::<Utc>::from_timestamp(BASE_TS + n as i64 * 3600, 0)
                            .unwrap_or_default(),
                    });
                    n += 1;
                }
            }
        }
        Self::new(products)
    }

    pub fn insert(&self, product: Product) {
        self.products.write().push(product);
    }

    pub fn len(&self) -> usize {
        self.products.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.read().is_empty()
    }

    fn matching<F>(&self, predicate: F) -> Vec<Product>
    where
        F: Fn(&Product) -> bool,
    {
        self.products
            .read()
            .iter()
            .filter(|p| predicate(p))
            .cloned()
            .collect()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Primary Store
// ═══════════════════════════════════════════════════════════════════════════════

#[async_trait]
impl PrimaryStore for InMemoryCatalog {
    async fn query(&self, query: &PrimaryQuery) -> Result<PrimaryPage> {
        let offset = match &query.page_token {
            Some(token) => token.parse::<usize>().map_err(|_| {
                CatalogError::backend_rejected("primary_store", format!("bad page token {}", token))
            })?,
            None => 0,
        };

        let mut items = self.matching(|p| {
            query
                .equals
                .iter()
                .all(|(field, expected)| p.field(field).as_ref() == Some(expected))
        });
        items.sort_by(|a, b| compare(a, b, query.sort, None));

        let total = items.len();
        let end = (offset + query.limit as usize).min(total);
        let page: Vec<Product> = items.into_iter().skip(offset).take(end.saturating_sub(offset)).collect();

        Ok(PrimaryPage {
            items: page,
            next_page_token: (end < total).then(|| end.to_string()),
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Search Index
// ═══════════════════════════════════════════════════════════════════════════════

#[async_trait]
impl SearchIndex for InMemoryCatalog {
    async fn search(&self, request: &SearchRequest) -> Result<SearchPage> {
        let terms: Vec<String> = request
            .text
            .as_deref()
            .unwrap_or_default()
            .split_whitespace()
            .map(str::to_lowercase)
            .collect();

        let mut scored: Vec<(u32, Product)> = self
            .matching(|p| {
                request.facet_filter_groups.iter().all(|group| {
                    p.field(&group.field)
                        .map(|v| group.any_of.iter().any(|want| *want == v.to_string()))
                        .unwrap_or(false)
                }) && request.numeric_filters.iter().all(|filter| {
                    p.number(&filter.field)
                        .map(|v| filter.matches(v))
                        .unwrap_or(false)
                })
            })
            .into_iter()
            .filter_map(|p| {
                let score = relevance(&p, &terms);
                (terms.is_empty() || score > 0).then_some((score, p))
            })
            .collect();

        scored.sort_by(|(sa, a), (sb, b)| compare(a, b, request.sort, Some((*sa, *sb))));

        let total_hits = scored.len() as u64;
        let page_size = request.page_size.max(1);
        let total_pages = total_hits.div_ceil(page_size as u64) as u32;
        let hits = scored
            .into_iter()
            .skip(request.page as usize * page_size as usize)
            .take(page_size as usize)
            .map(|(_, p)| p)
            .collect();

        Ok(SearchPage {
            hits,
            page: request.page,
            total_pages,
            total_hits,
        })
    }

    async fn fetch_facets(&self, context: &FacetContext) -> Result<FacetSummary> {
        let products = self.matching(|p| in_context(p, context));

        let mut counts: BTreeMap<String, BTreeMap<String, u64>> = BTreeMap::new();
        for product in &products {
            let mut bump = |field: String, value: &str| {
                *counts
                    .entry(field)
                    .or_default()
                    .entry(value.to_string())
                    .or_default() += 1;
            };
            bump(fields::BRAND.to_string(), &product.brand);
            if let Some(color) = &product.color {
                bump(fields::COLOR.to_string(), color);
            }
            if let Some(leaf) = &product.sub_subcategory {
                bump(fields::SUB_SUBCATEGORY.to_string(), leaf);
            }
            for (name, value) in &product.specs {
                bump(format!("{}{}", fields::SPEC_PREFIX, name), value);
            }
        }

        Ok(counts
            .into_iter()
            .map(|(field, values)| {
                let mut values: Vec<FacetValue> = values
                    .into_iter()
                    .map(|(value, count)| FacetValue { value, count })
                    .collect();
                values.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.value.cmp(&b.value)));
                (field, values)
            })
            .collect())
    }
}

fn in_context(product: &Product, context: &FacetContext) -> bool {
    let path = &context.category;
    let eq = |want: &Option<String>, have: Option<&str>| match want {
        Some(w) => have == Some(w.as_str()),
        None => true,
    };
    eq(&path.category, Some(product.category.as_str()))
        && eq(&path.subcategory, product.subcategory.as_deref())
        && eq(&path.sub_subcategory, product.sub_subcategory.as_deref())
        && eq(&context.gender, product.gender.as_deref())
}

/// Number of query terms found in the name (weighted) or brand.
fn relevance(product: &Product, terms: &[String]) -> u32 {
    let name = product.name.to_lowercase();
    let brand = product.brand.to_lowercase();
    terms
        .iter()
        .map(|t| {
            let mut score = 0;
            if name.contains(t.as_str()) {
                score += 2;
            }
            if brand.contains(t.as_str()) {
                score += 1;
            }
            score
        })
        .sum()
}

fn compare(a: &Product, b: &Product, sort: SortKey, scores: Option<(u32, u32)>) -> Ordering {
    let ordering = match sort.field {
        SortField::CreatedAt => a.created_at.cmp(&b.created_at),
        SortField::Name => a.name.cmp(&b.name),
        SortField::Price => a.price.total_cmp(&b.price),
        SortField::SalesCount => a.sales_count.cmp(&b.sales_count),
        SortField::TrendingScore => a.trending_score.total_cmp(&b.trending_score),
        SortField::Relevance => match scores {
            Some((sa, sb)) => sa.cmp(&sb),
            None => a.created_at.cmp(&b.created_at),
        },
    };
    let ordering = match sort.direction {
        SortDirection::Asc => ordering,
        SortDirection::Desc => ordering.reverse(),
    };
    ordering.then_with(|| a.id.cmp(&b.id))
}

/// Equality filter helper for building primary queries in tests and tools.
pub fn equals(field: &str, value: impl Into<String>) -> (String, FieldValue) {
    (field.to_string(), FieldValue::Text(value.into()))
}
