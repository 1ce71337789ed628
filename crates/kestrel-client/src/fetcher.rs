use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use kestrel_core::error::AppError;
use kestrel_core::listing::{LISTING_PAYLOAD, ListingResponse};
use kestrel_core::models::cookie_header;
use kestrel_core::walker::{CrawlIdentity, ListingFetcher};
use reqwest::header::{ACCEPT, CONTENT_TYPE, COOKIE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Proxy};

const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Listing client using reqwest.
///
/// Every request is a `POST` of [`LISTING_PAYLOAD`] carrying the identity's
/// cookies. A proxy changes the transport, so one client is built per proxy
/// URL and kept for reuse; requests without a proxy go direct.
#[derive(Clone)]
pub struct ReqwestListingFetcher {
    direct: Client,
    proxied: Arc<Mutex<HashMap<String, Client>>>,
    timeout: Duration,
}

impl ReqwestListingFetcher {
    /// Fetcher with a **60 s** request timeout.
    pub fn new() -> Result<Self, AppError> {
        Self::with_timeout(Duration::from_secs(60))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, AppError> {
        Ok(Self {
            direct: Self::build_client(None, timeout)?,
            proxied: Arc::new(Mutex::new(HashMap::new())),
            timeout,
        })
    }

    fn build_client(proxy_url: Option<&str>, timeout: Duration) -> Result<Client, AppError> {
        let mut builder = Client::builder().user_agent(USER_AGENT).timeout(timeout);
        if let Some(url) = proxy_url {
            let proxy = Proxy::all(url)
                .map_err(|e| AppError::InvalidInput(format!("Invalid proxy URL: {e}")))?;
            builder = builder.proxy(proxy);
        }
        builder
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))
    }

    fn client_for(&self, identity: &CrawlIdentity) -> Result<Client, AppError> {
        let Some(proxy) = &identity.proxy else {
            return Ok(self.direct.clone());
        };
        let mut clients = self
            .proxied
            .lock()
            .map_err(|_| AppError::Generic("proxy client cache poisoned".into()))?;
        if let Some(client) = clients.get(&proxy.url) {
            return Ok(client.clone());
        }
        let client = Self::build_client(Some(&proxy.url), self.timeout)?;
        clients.insert(proxy.url.clone(), client.clone());
        Ok(client)
    }
}

/// Request headers for one listing call.
pub fn listing_headers(identity: &CrawlIdentity) -> Result<HeaderMap, AppError> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(ACCEPT, HeaderValue::from_static("text/html,*/*"));
    headers.insert(
        HeaderName::from_static("x-requested-with"),
        HeaderValue::from_static("XMLHttpRequest"),
    );

    if !identity.cookies.is_empty() {
        let value = HeaderValue::from_str(&cookie_header(&identity.cookies))
            .map_err(|e| AppError::InvalidInput(format!("Cookie header is not valid: {e}")))?;
        headers.insert(COOKIE, value);
    }

    if let Some(proxy) = &identity.proxy {
        for (name, value) in &proxy.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| AppError::InvalidInput(format!("Invalid proxy header '{name}': {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| AppError::InvalidInput(format!("Invalid proxy header value: {e}")))?;
            headers.insert(name, value);
        }
    }
    Ok(headers)
}

impl ListingFetcher for ReqwestListingFetcher {
    async fn fetch(&self, url: &str, identity: &CrawlIdentity) -> Result<ListingResponse, AppError> {
        let client = self.client_for(identity)?;
        let headers = listing_headers(identity)?;

        let response = client
            .post(url)
            .headers(headers)
            .body(LISTING_PAYLOAD)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Timeout(self.timeout.as_secs())
                } else if e.is_connect() {
                    AppError::NetworkError(format!("Connection failed: {e}"))
                } else {
                    AppError::HttpError(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| AppError::NetworkError(format!("Failed to read response body: {e}")))?;

        Ok(ListingResponse { status, body })
    }
}
