//! Request description types
//!
//! [`RequestParams`] is the immutable description of one request: verb,
//! addressing, credentials, optional properties and the streaming hooks
//! that move payload bytes in and out of the engine.

use bytes::Bytes;

use crate::error_xml::ErrorDetails;
use crate::response::ResponseProperties;
use crate::status::Status;

/// HTTP request type of an operation. `Copy` is dispatched as a `PUT`
/// with copy-source headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpRequestType {
    Get,
    Head,
    Put,
    Post,
    Delete,
    Copy,
}

impl HttpRequestType {
    /// The verb as signed and sent on the wire.
    #[must_use]
    pub(crate) fn verb(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Put | Self::Copy => "PUT",
            Self::Post => "POST",
            Self::Delete => "DELETE",
        }
    }

    pub(crate) fn method(self) -> http::Method {
        match self {
            Self::Get => http::Method::GET,
            Self::Head => http::Method::HEAD,
            Self::Put | Self::Copy => http::Method::PUT,
            Self::Post => http::Method::POST,
            Self::Delete => http::Method::DELETE,
        }
    }

    /// True for verbs that carry a request body from the caller.
    pub(crate) fn has_upload_body(self) -> bool {
        matches!(self, Self::Put | Self::Post)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Https,
    Http,
}

/// Bucket addressing style.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UriStyle {
    /// `bucket.host/key`
    VirtualHost,
    /// `host/bucket/key`
    Path,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CannedAcl {
    #[default]
    Private,
    PublicRead,
    PublicReadWrite,
    AuthenticatedRead,
}

impl CannedAcl {
    /// The `x-amz-acl` header value; `Private` emits no header.
    pub(crate) fn header_value(self) -> Option<&'static str> {
        match self {
            Self::Private => None,
            Self::PublicRead => Some("public-read"),
            Self::PublicReadWrite => Some("public-read-write"),
            Self::AuthenticatedRead => Some("authenticated-read"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureVersion {
    V2,
    V4,
}

/// A single user metadata entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameValue {
    pub name: String,
    pub value: String,
}

/// Addressing and credential context shared by all operations against one
/// bucket.
#[derive(Debug, Clone)]
pub struct BucketContext {
    pub protocol: Protocol,
    pub uri_style: UriStyle,
    /// Overrides the engine's default host name when set.
    pub host_name: Option<String>,
    /// Forces the `Host` header to this exact value. Enables the custom
    /// TLS hostname verification against this name.
    pub host_header_value: Option<String>,
    pub bucket_name: Option<String>,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub security_token: Option<String>,
    /// `host:port:realhost:realport` connection override.
    pub connect_to: Option<String>,
    /// When true, negotiate TLS 1.2 or newer; otherwise exactly TLS 1.2.
    pub unbound_tls_version: bool,
}

impl BucketContext {
    /// A minimal HTTPS virtual-host context with the given credentials.
    #[must_use]
    pub fn new(bucket_name: impl Into<String>, access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            protocol: Protocol::Https,
            uri_style: UriStyle::VirtualHost,
            host_name: None,
            host_header_value: None,
            bucket_name: Some(bucket_name.into()),
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            security_token: None,
            connect_to: None,
            unbound_tls_version: true,
        }
    }
}

/// Properties applied to stored objects on PUT/COPY.
#[derive(Debug, Clone, Default)]
pub struct PutProperties {
    pub content_type: Option<String>,
    /// Base64 MD5 of the payload, sent as `Content-MD5`.
    pub md5: Option<String>,
    /// Precomputed hex SHA-256 of the payload for V4 signing. When absent
    /// the payload is declared `UNSIGNED-PAYLOAD`.
    pub content_sha256: Option<String>,
    pub cache_control: Option<String>,
    /// Rendered as `Content-Disposition: attachment; filename="..."`.
    pub content_disposition_filename: Option<String>,
    pub content_encoding: Option<String>,
    /// Epoch seconds for the `Expires` header.
    pub expires: Option<i64>,
    pub canned_acl: CannedAcl,
    pub use_server_side_encryption: bool,
    pub meta_data: Vec<NameValue>,
}

/// Conditional-GET constraints.
#[derive(Debug, Clone, Default)]
pub struct GetConditions {
    pub if_modified_since: Option<i64>,
    pub if_not_modified_since: Option<i64>,
    pub if_match_etag: Option<String>,
    pub if_not_match_etag: Option<String>,
}

/// Returned by a streaming hook to abort the transfer. The request
/// finishes with [`Status::AbortedByCallback`](crate::Status::AbortedByCallback).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Aborted;

/// Producer of outbound payload bytes.
///
/// The engine never asks for more than the declared total size in
/// aggregate; a short read (`Ok(0)`) ends the body early.
pub trait UploadSource: Send {
    /// Fills `buf` with the next payload bytes, returning how many were
    /// written.
    ///
    /// # Errors
    /// Returns [`Aborted`] to cancel the transfer.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Aborted>;

    /// Rewinds to the start of the payload, returning whether the source
    /// supports replay. Sources that cannot rewind make redirected
    /// uploads fail instead of silently resending garbage.
    fn rewind(&mut self) -> bool {
        false
    }
}

/// Consumer of inbound payload bytes.
pub trait DownloadSink: Send {
    /// Accepts the next chunk of response payload.
    ///
    /// # Errors
    /// Returns [`Aborted`] to cancel the transfer.
    fn write(&mut self, data: &[u8]) -> Result<(), Aborted>;
}

/// [`UploadSource`] over an in-memory buffer.
#[derive(Debug, Clone)]
pub struct BytesSource {
    data: Bytes,
    pos: usize,
}

impl BytesSource {
    #[must_use]
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into(), pos: 0 }
    }

    /// Total payload length, for `upload_total_size`.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl UploadSource for BytesSource {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Aborted> {
        let rest = &self.data[self.pos..];
        let n = rest.len().min(buf.len());
        buf[..n].copy_from_slice(&rest[..n]);
        self.pos += n;
        Ok(n)
    }

    fn rewind(&mut self) -> bool {
        self.pos = 0;
        true
    }
}

/// [`DownloadSink`] collecting the response payload into a `Vec<u8>`.
#[derive(Debug, Default)]
pub struct VecSink {
    data: Vec<u8>,
}

impl VecSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

impl DownloadSink for VecSink {
    fn write(&mut self, data: &[u8]) -> Result<(), Aborted> {
        self.data.extend_from_slice(data);
        Ok(())
    }
}

/// Hook invoked once with the parsed response headers of a 2xx response.
pub type PropertiesHandler = Box<dyn FnMut(&ResponseProperties) -> Result<(), Aborted> + Send>;

/// Final outcome of one request, delivered exactly once.
#[derive(Debug, Default)]
pub struct Completion {
    pub status: Status,
    /// HTTP response code, zero when no response arrived.
    pub http_status: u16,
    /// Parsed server error document, when one was returned.
    pub error_details: Option<ErrorDetails>,
}

impl Completion {
    /// A completion for a request that never reached the wire.
    pub(crate) fn failed(status: Status) -> Self {
        Self { status, http_status: 0, error_details: None }
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status.is_ok()
    }
}

/// Complete description of one request.
pub struct RequestParams {
    pub request_type: HttpRequestType,
    pub bucket_context: BucketContext,
    pub key: Option<String>,
    /// Sub-resource query, e.g. `acl` or `uploads`, appended after `?`.
    pub sub_resource: Option<String>,
    /// Additional query parameters, already URL encoded.
    pub query_params: Option<String>,
    pub copy_source_bucket_name: Option<String>,
    pub copy_source_key: Option<String>,
    /// First byte of the requested range. Zero together with a zero
    /// `byte_count` means no `Range` header.
    pub start_byte: u64,
    /// Number of bytes requested; zero means "to the end".
    pub byte_count: u64,
    pub put_properties: Option<PutProperties>,
    pub get_conditions: Option<GetConditions>,
    pub upload_source: Option<Box<dyn UploadSource>>,
    /// Declared total size of the outbound payload.
    pub upload_total_size: u64,
    pub download_sink: Option<Box<dyn DownloadSink>>,
    pub on_properties: Option<PropertiesHandler>,
}

impl RequestParams {
    /// A request with everything optional left unset.
    #[must_use]
    pub fn new(request_type: HttpRequestType, bucket_context: BucketContext) -> Self {
        Self {
            request_type,
            bucket_context,
            key: None,
            sub_resource: None,
            query_params: None,
            copy_source_bucket_name: None,
            copy_source_key: None,
            start_byte: 0,
            byte_count: 0,
            put_properties: None,
            get_conditions: None,
            upload_source: None,
            upload_total_size: 0,
            download_sink: None,
            on_properties: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_is_dispatched_as_put() {
        assert_eq!(HttpRequestType::Copy.verb(), "PUT");
        assert_eq!(HttpRequestType::Copy.method(), http::Method::PUT);
        assert!(!HttpRequestType::Copy.has_upload_body());
    }

    #[test]
    fn bytes_source_reads_and_rewinds() {
        let mut src = BytesSource::new(&b"hello world"[..]);
        let mut buf = [0u8; 4];
        assert_eq!(src.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"hell");
        assert!(src.rewind());
        let mut all = vec![0u8; 32];
        assert_eq!(src.read(&mut all).unwrap(), 11);
        assert_eq!(src.read(&mut all).unwrap(), 0);
    }

    #[test]
    fn private_acl_emits_no_header() {
        assert_eq!(CannedAcl::Private.header_value(), None);
        assert_eq!(CannedAcl::PublicRead.header_value(), Some("public-read"));
    }
}
