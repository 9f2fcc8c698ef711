//! Outgoing header composition
//!
//! Builds every textual header value from the request parameters into the
//! per-request scratch space. `x-amz-*` lines are normalized here — name
//! lowercased, exactly one `": "` separator, trailing blanks stripped —
//! so the canonicalizers can treat them uniformly.

use time::OffsetDateTime;

use crate::dto::{HttpRequestType, RequestParams, SignatureVersion, UriStyle};
use crate::limits;
use crate::status::Status;
use crate::time::{format_amz_timestamp, format_header_time, format_http_date};

const META_HEADER_PREFIX: &str = "x-amz-meta-";
const TAGGING_DIRECTIVE: &str = "tagging";
const TAGGING_HEADER_NAME: &str = "x-amz-tagging";

/// Per-request scratch space: every composed header value, the encoded
/// key, the canonical strings and the signing artifacts. Lives for a
/// single perform call.
#[derive(Debug, Default)]
pub(crate) struct ComputedValues {
    /// Normalized `name: value` lines, in generation order.
    pub amz_headers: Vec<String>,
    pub url_encoded_key: String,
    pub canonicalized_amz_headers: String,
    pub canonicalized_resource: String,
    pub cache_control: String,
    pub content_type: String,
    pub md5: String,
    pub content_disposition: String,
    pub content_encoding: String,
    pub expires: String,
    pub if_modified_since: String,
    pub if_unmodified_since: String,
    pub if_match: String,
    pub if_none_match: String,
    pub range: String,
    pub authorization: String,
    pub host: String,
    /// ISO 8601 timestamp (`yyyymmddThhmmssZ`), V4 only.
    pub timestamp: String,
    /// `;`-joined lowercased signed header names, V4 only.
    pub signed_headers: String,
}

impl ComputedValues {
    /// Total bytes currently held by the composed `x-amz-*` lines.
    fn amz_headers_len(&self) -> usize {
        self.amz_headers.iter().map(String::len).sum()
    }

    fn push_amz_header(&mut self, line: String) -> Result<(), Status> {
        let mut line = line;
        while line.ends_with(' ') {
            line.pop();
        }
        if self.amz_headers_len() + line.len() > limits::MAX_AMZ_HEADERS_SIZE {
            return Err(Status::MetaDataHeadersTooLong);
        }
        self.amz_headers.push(line);
        Ok(())
    }
}

/// Composes all `x-amz-*` headers: user metadata, canned ACL, server-side
/// encryption, the date header, the V4 content hash, copy-source headers
/// and the security token.
pub(crate) fn compose_amz_headers(
    params: &RequestParams,
    values: &mut ComputedValues,
    signature_version: SignatureVersion,
    now: OffsetDateTime,
) -> Result<(), Status> {
    let properties = params.put_properties.as_ref();

    if let Some(properties) = properties {
        if properties.meta_data.len() > limits::MAX_METADATA_COUNT {
            return Err(Status::MetaDataHeadersTooLong);
        }
        for meta in &properties.meta_data {
            let name = if meta.name == TAGGING_DIRECTIVE {
                TAGGING_HEADER_NAME.to_owned()
            } else {
                format!("{META_HEADER_PREFIX}{}", meta.name)
            };
            values.push_amz_header(format!("{}: {}", name.to_ascii_lowercase(), meta.value))?;
        }

        if let Some(acl) = properties.canned_acl.header_value() {
            values.push_amz_header(format!("x-amz-acl: {acl}"))?;
        }

        if properties.use_server_side_encryption {
            values.push_amz_header("x-amz-server-side-encryption: AES256".to_owned())?;
        }
    }

    let date = match signature_version {
        SignatureVersion::V2 => format_http_date(now)?,
        SignatureVersion::V4 => {
            let stamp = format_amz_timestamp(now)?;
            values.timestamp = stamp.clone();
            stamp
        }
    };
    values.push_amz_header(format!("x-amz-date: {date}"))?;

    if signature_version == SignatureVersion::V4 {
        let payload_hash = properties
            .and_then(|p| p.content_sha256.as_deref())
            .filter(|s| !s.is_empty())
            .unwrap_or("UNSIGNED-PAYLOAD");
        values.push_amz_header(format!("x-amz-content-sha256: {payload_hash}"))?;
    }

    if params.request_type == HttpRequestType::Copy {
        if let (Some(src_bucket), Some(src_key)) = (
            params.copy_source_bucket_name.as_deref().filter(|s| !s.is_empty()),
            params.copy_source_key.as_deref().filter(|s| !s.is_empty()),
        ) {
            values.push_amz_header(format!("x-amz-copy-source: /{src_bucket}/{src_key}"))?;
        }
        if params.byte_count > 0 {
            values.push_amz_header(format!(
                "x-amz-copy-source-range: bytes={}-{}",
                params.start_byte,
                params.start_byte + params.byte_count
            ))?;
        }
        if properties.is_some() {
            values.push_amz_header("x-amz-metadata-directive: REPLACE".to_owned())?;
        }
    }

    if let Some(token) = params.bucket_context.security_token.as_deref() {
        values.push_amz_header(format!("x-amz-security-token: {token}"))?;
    }

    Ok(())
}

fn is_blank(c: char) -> bool {
    c == ' ' || c == '\t'
}

/// Validates and renders one standard header value: leading blanks are
/// dropped, an all-blank input is an error, the rendered header must fit
/// the per-field budget, and trailing blanks are stripped.
fn compose_value(
    source: Option<&str>,
    header_name: &str,
    render: impl FnOnce(&str) -> String,
    bad: Status,
    too_long: Status,
) -> Result<String, Status> {
    let Some(raw) = source.filter(|s| !s.is_empty()) else {
        return Ok(String::new());
    };
    let trimmed = raw.trim_start_matches(is_blank);
    if trimmed.is_empty() {
        return Err(bad);
    }
    let mut value = render(trimmed);
    if header_name.len() + 2 + value.len() > limits::MAX_STANDARD_HEADER_SIZE {
        return Err(too_long);
    }
    while value.ends_with(is_blank) {
        value.pop();
    }
    Ok(value)
}

/// Composes `Host`, the `Content-*` family, `Expires`, the conditional
/// headers and `Range`. Empty results mean the header is not attached.
pub(crate) fn compose_standard_headers(
    params: &RequestParams,
    values: &mut ComputedValues,
    signature_version: SignatureVersion,
    default_host: &str,
) -> Result<(), Status> {
    let ctx = &params.bucket_context;

    // Host
    let bucket = ctx.bucket_name.as_deref().filter(|b| !b.is_empty());
    if ctx.uri_style == UriStyle::VirtualHost && bucket.is_some() {
        let host = ctx.host_name.as_deref().unwrap_or(default_host);
        let value = format!("{}.{host}", bucket.unwrap_or_default());
        if value.len() + "Host: ".len() > limits::MAX_STANDARD_HEADER_SIZE {
            return Err(Status::UriTooLong);
        }
        values.host = value;
    } else if let Some(forced) = ctx.host_header_value.as_deref().filter(|v| !v.is_empty()) {
        if forced.len() + "Host: ".len() > limits::MAX_STANDARD_HEADER_SIZE {
            return Err(Status::UriTooLong);
        }
        values.host = forced.to_owned();
    } else if signature_version == SignatureVersion::V4 {
        values.host = ctx.host_name.as_deref().unwrap_or(default_host).to_owned();
    } else {
        values.host = String::new();
    }

    let put = params.put_properties.as_ref();
    let get = params.get_conditions.as_ref();

    values.cache_control = compose_value(
        put.and_then(|p| p.cache_control.as_deref()),
        "Cache-Control",
        str::to_owned,
        Status::BadCacheControl,
        Status::CacheControlTooLong,
    )?;

    values.content_type = compose_value(
        put.and_then(|p| p.content_type.as_deref()),
        "Content-Type",
        str::to_owned,
        Status::BadContentType,
        Status::ContentTypeTooLong,
    )?;

    values.md5 = compose_value(
        put.and_then(|p| p.md5.as_deref()),
        "Content-MD5",
        str::to_owned,
        Status::BadMd5,
        Status::Md5TooLong,
    )?;

    values.content_disposition = compose_value(
        put.and_then(|p| p.content_disposition_filename.as_deref()),
        "Content-Disposition",
        |v| format!("attachment; filename=\"{v}\""),
        Status::BadContentDispositionFilename,
        Status::ContentDispositionFilenameTooLong,
    )?;

    values.content_encoding = compose_value(
        put.and_then(|p| p.content_encoding.as_deref()),
        "Content-Encoding",
        str::to_owned,
        Status::BadContentEncoding,
        Status::ContentEncodingTooLong,
    )?;

    values.expires = match put.and_then(|p| p.expires) {
        Some(epoch) => format_header_time(epoch)?,
        None => String::new(),
    };

    values.if_modified_since = match get.and_then(|g| g.if_modified_since) {
        Some(epoch) => format_header_time(epoch)?,
        None => String::new(),
    };

    values.if_unmodified_since = match get.and_then(|g| g.if_not_modified_since) {
        Some(epoch) => format_header_time(epoch)?,
        None => String::new(),
    };

    values.if_match = compose_value(
        get.and_then(|g| g.if_match_etag.as_deref()),
        "If-Match",
        str::to_owned,
        Status::BadIfMatchEtag,
        Status::IfMatchEtagTooLong,
    )?;

    values.if_none_match = compose_value(
        get.and_then(|g| g.if_not_match_etag.as_deref()),
        "If-None-Match",
        str::to_owned,
        Status::BadIfNotMatchEtag,
        Status::IfNotMatchEtagTooLong,
    )?;

    values.range = if params.start_byte > 0 || params.byte_count > 0 {
        if params.byte_count > 0 {
            format!("bytes={}-{}", params.start_byte, params.start_byte + params.byte_count - 1)
        } else {
            format!("bytes={}-", params.start_byte)
        }
    } else {
        String::new()
    };

    Ok(())
}
