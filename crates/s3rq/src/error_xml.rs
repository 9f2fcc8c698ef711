//! Server error document parsing
//!
//! Non-2xx response bodies are accumulated (bounded) and parsed as the
//! S3 `<Error>` XML document. Recognized children land in dedicated
//! fields; anything else is preserved as extra detail.

use quick_xml::Reader;
use quick_xml::events::Event;

use crate::dto::NameValue;
use crate::status::Status;

/// Error body accumulation cap. Real S3 error documents are tiny; this
/// only guards against a hostile peer.
const MAX_ERROR_BODY_SIZE: usize = 512 * 1024;

/// Parsed server error document.
#[derive(Debug, Clone, Default)]
pub struct ErrorDetails {
    /// The raw `<Code>` value.
    pub code: Option<String>,
    pub message: Option<String>,
    pub resource: Option<String>,
    pub further_details: Option<String>,
    /// Unrecognized `<Error>` children, in document order.
    pub extra_details: Vec<NameValue>,
}

/// Accumulates and parses the error body of one exchange.
#[derive(Debug, Default)]
pub(crate) struct ErrorParser {
    buf: Vec<u8>,
}

impl ErrorParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk of the error body. Bytes beyond the cap are dropped.
    pub fn add(&mut self, data: &[u8]) {
        let room = MAX_ERROR_BODY_SIZE.saturating_sub(self.buf.len());
        self.buf.extend_from_slice(&data[..data.len().min(room)]);
    }

    /// Parses whatever arrived. Returns `None` when there was no body or
    /// the body was not an error document.
    pub fn finish(&self) -> Option<ErrorDetails> {
        if self.buf.is_empty() {
            return None;
        }
        let text = String::from_utf8_lossy(&self.buf);
        parse_error_document(&text)
    }

    /// The status conveyed by the parsed document, if any.
    pub fn status(details: &ErrorDetails) -> Option<Status> {
        details.code.as_deref().map(Status::from_error_code)
    }
}

fn parse_error_document(text: &str) -> Option<ErrorDetails> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut details = ErrorDetails::default();
    let mut found_error = false;
    let mut depth = 0usize;
    let mut current_field: Option<String> = None;

    loop {
        match reader.read_event().ok()? {
            Event::Start(e) => {
                depth += 1;
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                if depth == 1 {
                    if name != "Error" {
                        return None;
                    }
                    found_error = true;
                } else if depth == 2 {
                    current_field = Some(name);
                }
            }
            Event::End(_) => {
                if depth == 2 {
                    current_field = None;
                }
                depth = depth.saturating_sub(1);
            }
            Event::Text(t) => {
                if depth >= 2
                    && let Some(field) = current_field.as_deref()
                {
                    let value = t.unescape().ok()?.into_owned();
                    match field {
                        "Code" => details.code = Some(value),
                        "Message" => details.message = Some(value),
                        "Resource" => details.resource = Some(value),
                        "FurtherDetails" => details.further_details = Some(value),
                        _ => details.extra_details.push(NameValue { name: field.to_owned(), value }),
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    found_error.then_some(details)
}
