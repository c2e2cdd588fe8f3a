//! Telling raster data apart from error documents.
//!
//! Coverage services often answer a bad request with a normal transport
//! response whose body is an XML exception report. Classification looks at
//! the bytes themselves, so it can be tested with literal fixtures and never
//! depends on the network call.

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

/// Longest preview of an unparseable error document kept in messages.
const PREVIEW_CHARS: usize = 500;

/// Coarse content type declared by the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentKind {
    Tiff,
    Image,
    Xml,
    Html,
    Text,
    Binary,
    Unknown,
}

impl ContentKind {
    /// Map a `Content-Type` header value (parameters ignored).
    pub fn from_content_type(content_type: Option<&str>) -> Self {
        let Some(ct) = content_type else {
            return Self::Unknown;
        };
        let mime = ct.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        if mime.contains("tiff") {
            Self::Tiff
        } else if mime.starts_with("image/") {
            Self::Image
        } else if mime.contains("xml") {
            Self::Xml
        } else if mime == "text/html" {
            Self::Html
        } else if mime.starts_with("text/") {
            Self::Text
        } else if mime == "application/octet-stream" {
            Self::Binary
        } else {
            Self::Unknown
        }
    }

    fn is_textual(&self) -> bool {
        matches!(self, Self::Xml | Self::Html | Self::Text)
    }
}

/// What a response body turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Data,
    /// An error document; carries the service's own reason.
    ServiceErrorPayload(String),
    /// Neither data nor a recognizable error document.
    Unrecognized(String),
}

/// Classify a response body.
///
/// Raster signatures win over the declared type. Markup, or any body the
/// service declared as text, is an error document. Other image and binary
/// bodies are data.
pub fn classify(bytes: &[u8], kind: &ContentKind) -> Classification {
    if bytes.is_empty() {
        return Classification::Unrecognized("empty response body".to_string());
    }
    if has_raster_signature(bytes) {
        return Classification::Data;
    }
    if looks_like_markup(bytes) || kind.is_textual() {
        return Classification::ServiceErrorPayload(service_reason(bytes));
    }
    match kind {
        ContentKind::Image | ContentKind::Binary => Classification::Data,
        ContentKind::Tiff => Classification::Unrecognized(format!(
            "declared TIFF but {} bytes without a TIFF signature",
            bytes.len()
        )),
        _ => Classification::Unrecognized(format!(
            "{} bytes of unrecognized content",
            bytes.len()
        )),
    }
}

fn has_raster_signature(bytes: &[u8]) -> bool {
    const SIGNATURES: &[&[u8]] = &[
        b"II*\0",       // TIFF, little endian
        b"MM\0*",       // TIFF, big endian
        b"II+\0",       // BigTIFF, little endian
        b"MM\0+",       // BigTIFF, big endian
        b"\x89PNG\r\n", // PNG
        b"\xFF\xD8\xFF", // JPEG
    ];
    SIGNATURES.iter().any(|sig| bytes.starts_with(sig))
}

fn strip_bom(bytes: &[u8]) -> &[u8] {
    bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes)
}

fn looks_like_markup(bytes: &[u8]) -> bool {
    strip_bom(bytes)
        .iter()
        .find(|b| !b.is_ascii_whitespace())
        .is_some_and(|&b| b == b'<')
}

/// The service's reason for an error document: exception text from a WCS
/// 1.0.0 `ServiceExceptionReport` or an OWS `ExceptionReport`, else a short
/// preview of the body.
pub fn service_reason(bytes: &[u8]) -> String {
    exception_reason(bytes).unwrap_or_else(|| preview(bytes))
}

/// Reason carried by a WCS or OWS exception element, if the document has
/// one.
pub fn exception_reason(bytes: &[u8]) -> Option<String> {
    let mut reader = Reader::from_reader(strip_bom(bytes));
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut code: Option<String> = None;
    let mut messages: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut capturing = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.local_name().as_ref() {
                b"ServiceException" => {
                    code = code.or_else(|| exception_code(e));
                    capturing = true;
                }
                b"Exception" => code = code.or_else(|| exception_code(e)),
                b"ExceptionText" => capturing = true,
                _ => {}
            },
            Ok(Event::Empty(ref e)) => {
                if matches!(e.local_name().as_ref(), b"ServiceException" | b"Exception") {
                    code = code.or_else(|| exception_code(e));
                }
            }
            Ok(Event::Text(ref t)) if capturing => {
                if let Ok(text) = t.unescape() {
                    push_text(&mut current, &text);
                }
            }
            Ok(Event::CData(c)) if capturing => {
                push_text(&mut current, &String::from_utf8_lossy(&c.into_inner()));
            }
            Ok(Event::End(ref e)) => {
                if matches!(e.local_name().as_ref(), b"ServiceException" | b"ExceptionText") {
                    capturing = false;
                    if !current.is_empty() {
                        messages.push(std::mem::take(&mut current));
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                log::debug!("Error document is not well-formed XML: {}", e);
                break;
            }
            _ => {}
        }
        buf.clear();
    }

    let message = messages.join("; ");
    match (code, message.is_empty()) {
        (Some(code), false) => Some(format!("{}: {}", code, message)),
        (Some(code), true) => Some(code),
        (None, false) => Some(message),
        (None, true) => None,
    }
}

fn exception_code(e: &BytesStart<'_>) -> Option<String> {
    e.attributes().flatten().find_map(|attr| {
        matches!(attr.key.local_name().as_ref(), b"code" | b"exceptionCode")
            .then(|| String::from_utf8_lossy(&attr.value).to_string())
    })
}

fn push_text(current: &mut String, text: &str) {
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.is_empty() {
        return;
    }
    if !current.is_empty() {
        current.push(' ');
    }
    current.push_str(&text);
}

fn preview(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(strip_bom(bytes));
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(PREVIEW_CHARS).collect()
}

#[cfg(test)]
#[path = "tests/classify_tests.rs"]
mod tests;
