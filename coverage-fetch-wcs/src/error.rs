use coverage_fetch_core::FetchError;

/// Errors setting up the WCS client.
#[derive(Debug, thiserror::Error)]
pub enum WcsError {
    #[error("Could not build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

/// Describe a failed HTTP exchange as a transport failure.
///
/// The message leads with what went wrong (timeout, connection) and ends
/// with the innermost cause, which is usually the useful part.
pub fn transport_error(err: &reqwest::Error) -> FetchError {
    let what = if err.is_timeout() {
        "request timed out"
    } else if err.is_connect() {
        "connection failed"
    } else if err.is_body() || err.is_decode() {
        "response body could not be read"
    } else {
        "request failed"
    };
    FetchError::transport(format!("{}: {}", what, root_cause(err)))
}

fn root_cause(err: &(dyn std::error::Error + 'static)) -> String {
    let mut current = err;
    while let Some(source) = current.source() {
        current = source;
    }
    current.to_string()
}
