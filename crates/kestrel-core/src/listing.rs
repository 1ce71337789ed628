//! Listing endpoint wire format: request URLs and the streamed response body.
//!
//! The body is a sequence of JSON arrays separated by `&&&`, each shaped
//! `[kind, slot, payload]`. The `data-search-metadata` slot carries the page
//! counters; every `data-main-slot:search-result*` slot carries one item.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::driver::ListingMarkers;
use crate::error::AppError;

/// Body sent with every listing request.
pub const LISTING_PAYLOAD: &str = r#"{"prefetch-type":"rq","customer-action":"pagination"}"#;

const METADATA_SLOT: &str = "data-search-metadata";
const RESULT_SLOT_PREFIX: &str = "data-main-slot:search-result";
const RETAINED_KEYS: [&str; 3] = ["rh", "fs", "i"];

/// Result ordering requested from the listing endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SortOrder {
    Featured,
    #[default]
    Newest,
    Bestsellers,
    Reviews,
    PriceDesc,
    PriceAsc,
}

impl SortOrder {
    /// Value of the `s` query parameter.
    pub fn as_param(&self) -> &'static str {
        match self {
            SortOrder::Featured => "featured-rank",
            SortOrder::Newest => "date-desc-rank",
            SortOrder::Bestsellers => "exact-aware-popularity-rank",
            SortOrder::Reviews => "review-rank",
            SortOrder::PriceDesc => "price-desc-rank",
            SortOrder::PriceAsc => "price-asc-rank",
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SortOrder::Featured => "featured",
            SortOrder::Newest => "newest",
            SortOrder::Bestsellers => "bestsellers",
            SortOrder::Reviews => "reviews",
            SortOrder::PriceDesc => "price-desc",
            SortOrder::PriceAsc => "price-asc",
        };
        f.write_str(name)
    }
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "featured" => Ok(SortOrder::Featured),
            "newest" => Ok(SortOrder::Newest),
            "bestsellers" => Ok(SortOrder::Bestsellers),
            "reviews" => Ok(SortOrder::Reviews),
            "price-desc" => Ok(SortOrder::PriceDesc),
            "price-asc" => Ok(SortOrder::PriceAsc),
            _ => Err(format!("Unknown sort order: {s}")),
        }
    }
}

/// Builds page URLs for one category.
#[derive(Debug, Clone)]
pub struct ListingUrl {
    base: Url,
    retained: Vec<(String, String)>,
    sort: SortOrder,
}

impl ListingUrl {
    /// Keep the category URL's `rh`, `fs` and `i` parameters and point them
    /// at the streaming endpoint under `root_url`.
    pub fn new(
        root_url: &str,
        query_path: &str,
        category_url: &str,
        sort: SortOrder,
    ) -> Result<Self, AppError> {
        let category = Url::parse(category_url).map_err(|e| {
            AppError::InvalidInput(format!("Invalid category URL '{category_url}': {e}"))
        })?;
        let mut base = Url::parse(root_url)
            .map_err(|e| AppError::ConfigError(format!("Invalid root URL '{root_url}': {e}")))?;
        base.set_path(query_path);
        base.set_query(None);

        let retained = RETAINED_KEYS
            .iter()
            .filter_map(|key| {
                category
                    .query_pairs()
                    .find(|(k, _)| k == key)
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
            })
            .collect();

        Ok(Self {
            base,
            retained,
            sort,
        })
    }

    pub fn page(&self, page: u32) -> String {
        let mut url = self.base.clone();
        {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in &self.retained {
                pairs.append_pair(k, v);
            }
            pairs.append_pair("page", &page.to_string());
            pairs.append_pair("ref", &format!("sr_pg_{page}"));
            pairs.append_pair("s", self.sort.as_param());
        }
        url.into()
    }
}

/// Raw response as returned by a [`crate::walker::ListingFetcher`].
#[derive(Debug, Clone, PartialEq)]
pub struct ListingResponse {
    pub status: u16,
    pub body: String,
}

/// Parsed listing page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingPage {
    /// Items the site says are on this page.
    pub in_page_count: u64,
    /// The site's approximate total for the whole category.
    pub approx_total: u64,
    /// Identifiers of the items actually received, in page order.
    pub item_ids: Vec<String>,
}

impl ListingPage {
    /// The site signals the last page either by a short page or by an
    /// approximate total equal to the page count.
    pub fn is_last(&self, min_items: u64) -> bool {
        self.in_page_count < min_items || self.approx_total == self.in_page_count
    }
}

/// Reject blocked or failed responses, then parse the body.
pub fn classify(response: &ListingResponse, markers: &ListingMarkers) -> Result<ListingPage, AppError> {
    if !(200..300).contains(&response.status) {
        return Err(AppError::HttpError(format!(
            "Listing request returned status {}",
            response.status
        )));
    }
    if response.body.contains(&markers.redirect_marker) {
        return Err(AppError::Blocked("redirect marker in listing body".into()));
    }
    if response.body.contains(&markers.automation_marker) {
        return Err(AppError::AutomationDetected(
            "automated access notice in listing body".into(),
        ));
    }
    parse_stream(&response.body)
}

/// Parse a `&&&`-separated listing stream.
pub fn parse_stream(body: &str) -> Result<ListingPage, AppError> {
    let mut metadata: Option<&Value> = None;
    let mut records = Vec::new();

    for chunk in body.split("&&&") {
        let chunk = chunk.trim();
        if chunk.is_empty() {
            continue;
        }
        let record: Value = serde_json::from_str(chunk)?;
        records.push(record);
    }

    let mut item_ids = Vec::new();
    for record in &records {
        let Some(slot) = record.get(1).and_then(Value::as_str) else {
            continue;
        };
        let payload = record.get(2);
        if slot == METADATA_SLOT {
            metadata = payload.and_then(|p| p.get("metadata"));
        } else if slot.starts_with(RESULT_SLOT_PREFIX) {
            match payload.and_then(|p| p.get("asin")).and_then(Value::as_str) {
                Some(id) if !id.is_empty() => item_ids.push(id.to_string()),
                _ => {}
            }
        }
    }

    let metadata = metadata
        .ok_or_else(|| AppError::InvalidInput("Listing body has no search metadata".into()))?;
    let counter = |key: &str| {
        metadata.get(key).and_then(Value::as_u64).ok_or_else(|| {
            AppError::InvalidInput(format!("Listing metadata is missing '{key}'"))
        })
    };

    Ok(ListingPage {
        in_page_count: counter("asinOnPageCount")?,
        approx_total: counter("totalResultCount")?,
        item_ids,
    })
}
