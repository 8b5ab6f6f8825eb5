//! Deterministic cache key generation.
//!
//! This module provides:
//! - Structured `field=value` keys derived from a [`NormalizedQuery`]
//! - Order-independent rendering of set-valued filters
//! - Escaping so that separators inside values can never collide
//! - Key versioning for cache invalidation across deployments

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::query::{CategoryPath, FacetContext, NormalizedQuery};

/// Bumped whenever the key layout changes so old entries are never read back.
pub const KEY_VERSION: u32 = 1;

const NAMESPACE: &str = "catalog";

// ═══════════════════════════════════════════════════════════════════════════════
// Key Types
// ═══════════════════════════════════════════════════════════════════════════════

/// Enumeration of the key families kept by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyType {
    /// One page of one listing
    Listing,

    /// A listing without its page, used to index primary-store page tokens
    ListingCursor,

    /// Facet aggregation for a category context
    Facets,
}

impl KeyType {
    /// Get the key type prefix for namespacing.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Listing => "listing",
            Self::ListingCursor => "cursor",
            Self::Facets => "facets",
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.prefix())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Key Writer
// ═══════════════════════════════════════════════════════════════════════════════

/// Accumulates `field=value` segments joined by `|`.
struct KeyWriter {
    buf: String,
}

impl KeyWriter {
    fn new(key_type: KeyType) -> Self {
        let mut buf = String::with_capacity(256);
        buf.push_str(NAMESPACE);
        buf.push(':');
        buf.push_str(key_type.prefix());
        buf.push_str(":v");
        buf.push_str(&KEY_VERSION.to_string());
        Self { buf }
    }

    fn begin(&mut self, field: &str) {
        self.buf.push('|');
        self.buf.push_str(field);
        self.buf.push('=');
    }

    fn text(&mut self, field: &str, value: Option<&str>) -> &mut Self {
        self.begin(field);
        if let Some(v) = value {
            escape_into(&mut self.buf, v);
        }
        self
    }

    fn raw(&mut self, field: &str, value: impl fmt::Display) -> &mut Self {
        self.begin(field);
        self.buf.push_str(&value.to_string());
        self
    }

    fn number(&mut self, field: &str, value: Option<f64>) -> &mut Self {
        self.begin(field);
        if let Some(v) = value {
            // normalizes -0
            self.buf.push_str(&(v + 0.0).to_string());
        }
        self
    }

    fn set(&mut self, field: &str, values: &BTreeSet<String>) -> &mut Self {
        self.begin(field);
        push_list(&mut self.buf, values);
        self
    }

    fn specs(&mut self, field: &str, specs: &BTreeMap<String, BTreeSet<String>>) -> &mut Self {
        self.begin(field);
        let mut first = true;
        for (name, values) in specs.iter().filter(|(_, v)| !v.is_empty()) {
            if !first {
                self.buf.push(';');
            }
            first = false;
            escape_into(&mut self.buf, name);
            self.buf.push(':');
            push_list(&mut self.buf, values);
        }
        self
    }

    fn category(&mut self, path: &CategoryPath) -> &mut Self {
        self.text("cat", path.category.as_deref())
            .text("sub", path.subcategory.as_deref())
            .text("subsub", path.sub_subcategory.as_deref())
    }

    fn finish(self) -> String {
        self.buf
    }
}

fn push_list(buf: &mut String, values: &BTreeSet<String>) {
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            buf.push(',');
        }
        escape_into(buf, value);
    }
}

/// Backslash-escape every character that has structural meaning in a key.
fn escape_into(buf: &mut String, value: &str) {
    for c in value.chars() {
        if matches!(c, '\\' | '|' | ',' | '=' | ':' | ';') {
            buf.push('\\');
        }
        buf.push(c);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Cache Key Builder
// ═══════════════════════════════════════════════════════════════════════════════

/// Builds cache keys for listings and facets.
///
/// Keys are pure functions of the normalized query: two queries that differ only
/// in the order of set members, or in an absent versus empty value, produce the
/// same key.
pub struct CacheKeyBuilder;

impl CacheKeyBuilder {
    /// Full listing key, including the page.
    pub fn build(query: &NormalizedQuery) -> String {
        let mut writer = KeyWriter::new(KeyType::Listing);
        Self::write_listing(&mut writer, query);
        writer.raw("page", query.page);
        writer.finish()
    }

    /// Listing key without the page index. All pages of a listing share it.
    pub fn listing(query: &NormalizedQuery) -> String {
        let mut writer = KeyWriter::new(KeyType::ListingCursor);
        Self::write_listing(&mut writer, query);
        writer.finish()
    }

    /// Facet key for the query's category context.
    pub fn facet_context(query: &NormalizedQuery) -> String {
        Self::facets(&query.facet_context())
    }

    /// Facet key for an explicit category context.
    pub fn facets(context: &FacetContext) -> String {
        let mut writer = KeyWriter::new(KeyType::Facets);
        writer
            .category(&context.category)
            .text("gender", context.gender.as_deref());
        writer.finish()
    }

    fn write_listing(writer: &mut KeyWriter, query: &NormalizedQuery) {
        writer
            .category(&query.category)
            .text("gender", query.gender.as_deref())
            .text("q", query.text.as_deref())
            .raw("sort", query.sort)
            .raw("size", query.page_size)
            .set("brands", &query.brands)
            .set("colors", &query.colors)
            .set("subsubs", &query.sub_subcategories)
            .specs("specs", &query.specs)
            .number("minPrice", query.min_price)
            .number("maxPrice", query.max_price)
            .number("minRating", query.min_rating)
            .raw("quick", query.quick_filter);
    }
}
