//! Page-token bookkeeping for the primary store.
//!
//! The primary store paginates with opaque tokens while clients ask for page
//! indexes. [`PageTokenIndex`] remembers, per listing, the token that starts each
//! page so that page N can be fetched directly once it has been reached once.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::Result;

/// Where a page walk can start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownPage {
    pub page: u32,
    /// `None` for the first page
    pub token: Option<String>,
}

/// Listing key -> page index -> page token.
pub struct PageTokenIndex {
    listings: DashMap<String, BTreeMap<u32, String>>,
    max_listings: usize,
}

impl PageTokenIndex {
    pub fn new(max_listings: usize) -> Self {
        Self {
            listings: DashMap::new(),
            max_listings: max_listings.max(1),
        }
    }

    /// The highest known page at or below `page`. Page 0 is always known.
    pub fn nearest_known(&self, listing: &str, page: u32) -> KnownPage {
        self.listings
            .get(listing)
            .and_then(|pages| {
                pages
                    .range(..=page)
                    .next_back()
                    .map(|(&page, token)| KnownPage {
                        page,
                        token: Some(token.clone()),
                    })
            })
            .unwrap_or(KnownPage { page: 0, token: None })
    }

    /// Remember that `page` of `listing` starts at `token`.
    pub fn record(&self, listing: &str, page: u32, token: String) {
        if page == 0 {
            return;
        }
        if !self.listings.contains_key(listing) && self.listings.len() >= self.max_listings {
            debug!(listings = self.max_listings, "Page token index full, starting over");
            self.listings.clear();
        }
        self.listings
            .entry(listing.to_string())
            .or_default()
            .insert(page, token);
    }

    pub fn clear(&self) {
        self.listings.clear();
    }

    /// Number of listings tracked.
    pub fn len(&self) -> usize {
        self.listings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listings.is_empty()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Client Cursor
// ═══════════════════════════════════════════════════════════════════════════════

/// Opaque continuation handed to clients alongside a primary-store page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageCursor {
    /// Page the token starts
    #[serde(rename = "p")]
    pub page: u32,
    #[serde(rename = "t")]
    pub token: String,
}

impl PageCursor {
    pub fn encode(&self) -> Result<String> {
        let json = serde_json::to_vec(self)?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }
}
