//! [`SessionSource`] backed by a running `kestrel-server`, so crawlers in
//! another process draw from the server's pools.

use std::time::Duration;

use kestrel_core::error::AppError;
use kestrel_core::models::{BrowserEngine, Cookie, ProxyEndpoint, ProxyPartition};
use kestrel_core::walker::{CrawlIdentity, SessionSource};
use reqwest::Client;
use serde::{Deserialize, Serialize};

#[derive(Serialize)]
struct FetchCookieBody<'a> {
    engine: BrowserEngine,
    do_fetch_pool: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    postcode: Option<&'a str>,
}

#[derive(Deserialize)]
struct FetchCookieReply {
    identity: Option<RemoteIdentity>,
}

#[derive(Deserialize)]
struct RemoteIdentity {
    cookies: Vec<Cookie>,
}

#[derive(Deserialize)]
struct RotateReply {
    proxy: Option<RemoteProxy>,
}

#[derive(Deserialize)]
struct RemoteProxy {
    content: String,
}

#[derive(Clone)]
pub struct ApiSessionSource {
    client: Client,
    base_url: String,
    engine: BrowserEngine,
    partition: ProxyPartition,
}

impl ApiSessionSource {
    pub fn new(
        base_url: impl Into<String>,
        engine: BrowserEngine,
        partition: ProxyPartition,
    ) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            engine,
            partition,
        })
    }

    async fn post<B: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, AppError> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Timeout(30)
                } else {
                    AppError::NetworkError(format!("{url}: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::HttpError(format!(
                "HTTP {} for {url}",
                status.as_u16()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| AppError::HttpError(format!("Malformed reply from {url}: {e}")))
    }
}

impl SessionSource for ApiSessionSource {
    async fn checkout(&self) -> Result<CrawlIdentity, AppError> {
        let reply: FetchCookieReply = self
            .post(
                "/cookie/fetch",
                &FetchCookieBody {
                    engine: self.engine,
                    do_fetch_pool: true,
                    postcode: None,
                },
            )
            .await?;
        let cookies = match reply.identity {
            Some(identity) => identity.cookies,
            None => {
                tracing::warn!(engine = %self.engine, "Remote identity pool empty, crawling without cookies");
                Vec::new()
            }
        };

        let reply: RotateReply = self.post("/proxy/rotate", &self.partition).await?;
        let proxy = match reply.proxy {
            Some(record) => match ProxyEndpoint::parse(&record.content) {
                Ok(endpoint) => Some(endpoint),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping malformed remote proxy");
                    None
                }
            },
            None => None,
        };

        Ok(CrawlIdentity { cookies, proxy })
    }
}
