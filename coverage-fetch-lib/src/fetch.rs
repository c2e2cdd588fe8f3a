//! The seam between the batch and the coverage service.
//!
//! A [`CoverageService`] performs the network call and reports what came
//! back. [`FetchClient`] turns that raw answer into artifact bytes or a
//! classified [`FetchError`], so every transport shares one set of rules
//! for telling data from error documents.

use std::future::Future;

use coverage_fetch_core::{FetchError, FetchRequest};

use crate::classify::{Classification, ContentKind, classify, exception_reason};

/// A raw answer from the service.
#[derive(Debug, Clone)]
pub struct CoveragePayload {
    pub bytes: Vec<u8>,
    pub content_kind: ContentKind,
    /// Protocol status code, when the transport has one.
    pub status: Option<u16>,
}

impl CoveragePayload {
    pub fn new(bytes: impl Into<Vec<u8>>, content_kind: ContentKind) -> Self {
        Self {
            bytes: bytes.into(),
            content_kind,
            status: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    fn is_success(&self) -> bool {
        self.status.is_none_or(|s| (200..300).contains(&s))
    }
}

/// Something that can perform one coverage request.
///
/// Implementations return `Err` only for failures where no answer arrived
/// (connection, timeout). Any answer, including an error document or a
/// non-success status, is returned as a payload.
pub trait CoverageService: Send + Sync + 'static {
    fn fetch(
        &self,
        request: &FetchRequest,
    ) -> impl Future<Output = Result<CoveragePayload, FetchError>> + Send;
}

/// Fetches a request and classifies the answer.
#[derive(Debug)]
pub struct FetchClient<S> {
    service: S,
}

impl<S: CoverageService> FetchClient<S> {
    pub fn new(service: S) -> Self {
        Self { service }
    }

    /// Fetch `request`, returning the artifact bytes.
    ///
    /// An exception report is a service error whatever the status code. Any
    /// other error document is a service error only on a success status;
    /// behind an error status it is a gateway or proxy page and counts as a
    /// transport error, as do data behind an error status and bodies that
    /// are neither.
    pub async fn fetch(&self, request: &FetchRequest) -> Result<Vec<u8>, FetchError> {
        let payload = self.service.fetch(request).await?;
        match classify(&payload.bytes, &payload.content_kind) {
            Classification::ServiceErrorPayload(reason)
                if !payload.is_success() && exception_reason(&payload.bytes).is_none() =>
            {
                log::debug!(
                    "Polygon {}: error page without an exception report: {}",
                    request.index,
                    reason
                );
                Err(FetchError::transport(format!(
                    "HTTP {}: {}",
                    payload.status.unwrap_or_default(),
                    reason
                )))
            }
            Classification::ServiceErrorPayload(reason) => {
                log::debug!("Polygon {}: service error: {}", request.index, reason);
                Err(FetchError::service(reason))
            }
            Classification::Data if payload.is_success() => Ok(payload.bytes),
            Classification::Data => Err(FetchError::transport(format!(
                "HTTP {}",
                payload.status.unwrap_or_default()
            ))),
            Classification::Unrecognized(detail) => match payload.status {
                Some(status) if !payload.is_success() => Err(FetchError::transport(format!(
                    "HTTP {}: malformed response: {}",
                    status, detail
                ))),
                _ => Err(FetchError::transport(format!("malformed response: {}", detail))),
            },
        }
    }
}
