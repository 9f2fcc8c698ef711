//! Response header accumulation
//!
//! Headers are fed in arrival order; once the header section is complete
//! the handler freezes them into [`ResponseProperties`] for the caller's
//! properties hook.

use crate::dto::NameValue;
use crate::time::parse_http_date;

const META_HEADER_PREFIX: &str = "x-amz-meta-";

/// Parsed response headers of interest to callers.
#[derive(Debug, Clone, Default)]
pub struct ResponseProperties {
    pub request_id: Option<String>,
    pub request_id_2: Option<String>,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub server: Option<String>,
    pub etag: Option<String>,
    /// Epoch seconds from `Last-Modified`.
    pub last_modified: Option<i64>,
    /// `x-amz-meta-*` headers, prefix stripped, in arrival order.
    pub meta_data: Vec<NameValue>,
    pub uses_server_side_encryption: bool,
}

/// Accumulates response headers for one exchange.
#[derive(Debug, Default)]
pub(crate) struct ResponseHeadersHandler {
    pub properties: ResponseProperties,
    done: bool,
}

impl ResponseHeadersHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one header in arrival order. Headers arriving after the
    /// section was marked done are ignored.
    pub fn add(&mut self, name: &str, value: &[u8]) {
        if self.done {
            return;
        }
        let value_str = || String::from_utf8_lossy(value).into_owned();
        if let Some(meta_name) = name.strip_prefix(META_HEADER_PREFIX) {
            self.properties.meta_data.push(NameValue {
                name: meta_name.to_owned(),
                value: value_str(),
            });
            return;
        }
        match name {
            "x-amz-request-id" => self.properties.request_id = Some(value_str()),
            "x-amz-id-2" => self.properties.request_id_2 = Some(value_str()),
            "content-type" => self.properties.content_type = Some(value_str()),
            "content-length" => {
                self.properties.content_length = std::str::from_utf8(value).ok().and_then(|v| v.trim().parse().ok());
            }
            "server" => self.properties.server = Some(value_str()),
            "etag" => self.properties.etag = Some(value_str()),
            "last-modified" => {
                self.properties.last_modified = std::str::from_utf8(value).ok().and_then(parse_http_date);
            }
            "x-amz-server-side-encryption" => self.properties.uses_server_side_encryption = true,
            _ => {}
        }
    }

    /// Marks the header section complete. Idempotent.
    pub fn done(&mut self) {
        self.done = true;
    }

    #[cfg(test)]
    pub fn is_done(&self) -> bool {
        self.done
    }
}
