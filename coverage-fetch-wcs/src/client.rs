use coverage_fetch_core::{FetchError, FetchRequest, ServiceConfig};
use coverage_fetch_lib::{ContentKind, CoveragePayload, CoverageService};
use reqwest::header::CONTENT_TYPE;

use crate::error::{WcsError, transport_error};
use crate::query;

/// HTTP client for WCS GetCoverage requests.
///
/// Pacing between requests is handled by the worker pool, so the client
/// sends as soon as it is asked.
#[derive(Debug, Clone)]
pub struct WcsClient {
    http: reqwest::Client,
}

impl WcsClient {
    /// Build a client whose requests time out after the service's
    /// configured timeout.
    pub fn new(service: &ServiceConfig) -> Result<Self, WcsError> {
        let http = reqwest::Client::builder()
            .timeout(service.timeout())
            .user_agent(concat!("coverage-fetch/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http })
    }
}

impl CoverageService for WcsClient {
    async fn fetch(&self, request: &FetchRequest) -> Result<CoveragePayload, FetchError> {
        let resp = self
            .http
            .get(&request.service.url)
            .query(&query::get_coverage(request))
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        let status = resp.status();
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let bytes = resp.bytes().await.map_err(|e| transport_error(&e))?;

        log::debug!(
            "Polygon {}: HTTP {} ({} bytes, {})",
            request.index,
            status.as_u16(),
            bytes.len(),
            content_type.as_deref().unwrap_or("no content type")
        );

        Ok(CoveragePayload::new(
            bytes.to_vec(),
            ContentKind::from_content_type(content_type.as_deref()),
        )
        .with_status(status.as_u16()))
    }
}
