//! URI composition
//!
//! Percent-encoding of object keys and assembly of the final request URI,
//! including the virtual-host / path-style authority selection rules.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

use crate::buf::BoundedBuf;
use crate::dto::{BucketContext, Protocol, UriStyle};
use crate::limits;
use crate::status::Status;

/// Everything outside the URI unreserved set is encoded.
const ENCODE_ALL: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.').remove(b'~');

/// Same as [`ENCODE_ALL`] but keeps `/` so keys stay path-shaped.
const ENCODE_KEY: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.').remove(b'~').remove(b'/');

/// Percent-encodes `s`. When `encode_slash` is false, `/` passes through
/// unchanged (object keys). Hex digits are uppercase as both signature
/// schemes require.
#[must_use]
pub(crate) fn uri_encode(s: &str, encode_slash: bool) -> String {
    let set = if encode_slash { ENCODE_ALL } else { ENCODE_KEY };
    utf8_percent_encode(s, set).to_string()
}

/// URL-encodes the object key for use in the URI and the canonicalized
/// resource.
pub(crate) fn encode_key(key: Option<&str>) -> Result<String, Status> {
    let Some(key) = key else { return Ok(String::new()) };
    if key.len() > limits::MAX_KEY_SIZE {
        return Err(Status::UriTooLong);
    }
    let encoded = uri_encode(key, false);
    if encoded.len() > limits::MAX_URLENCODED_KEY_SIZE {
        return Err(Status::UriTooLong);
    }
    Ok(encoded)
}

/// Composes the full request URI.
///
/// Authority selection:
/// - virtual-host style with a dot-free bucket: `bucket.host`;
/// - virtual-host style with a dotted bucket: bare `host` (the forced
///   `Host` header and the custom TLS hostname check take over);
/// - path style: `host/bucket`;
/// - no bucket: bare `host`.
pub(crate) fn compose_uri(
    bucket_context: &BucketContext,
    default_host: &str,
    url_encoded_key: &str,
    sub_resource: Option<&str>,
    query_params: Option<&str>,
) -> Result<String, Status> {
    compose_uri_bounded(
        limits::MAX_URI_SIZE,
        bucket_context,
        default_host,
        url_encoded_key,
        sub_resource,
        query_params,
    )
}

/// [`compose_uri`] with an explicit size cap; presigned URLs get a
/// larger budget for their query string.
pub(crate) fn compose_uri_bounded(
    cap: usize,
    bucket_context: &BucketContext,
    default_host: &str,
    url_encoded_key: &str,
    sub_resource: Option<&str>,
    query_params: Option<&str>,
) -> Result<String, Status> {
    let mut buf = BoundedBuf::new(cap);
    compose_uri_into(&mut buf, bucket_context, default_host, url_encoded_key, sub_resource, query_params)
        .map_err(|_| Status::UriTooLong)?;
    Ok(buf.into_string())
}

fn compose_uri_into(
    buf: &mut BoundedBuf,
    bucket_context: &BucketContext,
    default_host: &str,
    url_encoded_key: &str,
    sub_resource: Option<&str>,
    query_params: Option<&str>,
) -> Result<(), crate::buf::Overflow> {
    buf.push_str(match bucket_context.protocol {
        Protocol::Http => "http://",
        Protocol::Https => "https://",
    })?;

    let host = bucket_context.host_name.as_deref().unwrap_or(default_host);

    match bucket_context.bucket_name.as_deref() {
        Some(bucket) if !bucket.is_empty() => {
            if bucket_context.uri_style == UriStyle::VirtualHost {
                if bucket.contains('.') {
                    buf.push_str(host)?;
                } else {
                    buf.push_fmt(format_args!("{bucket}.{host}"))?;
                }
            } else {
                buf.push_fmt(format_args!("{host}/{bucket}"))?;
            }
        }
        _ => buf.push_str(host)?,
    }

    buf.push('/')?;
    buf.push_str(url_encoded_key)?;

    let has_sub_resource = sub_resource.is_some_and(|s| !s.is_empty());
    if let Some(sub_resource) = sub_resource
        && !sub_resource.is_empty()
    {
        buf.push('?')?;
        buf.push_str(sub_resource)?;
    }
    if let Some(query_params) = query_params
        && !query_params.is_empty()
    {
        buf.push(if has_sub_resource { '&' } else { '?' })?;
        buf.push_str(query_params)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(style: UriStyle, bucket: Option<&str>) -> BucketContext {
        BucketContext {
            protocol: Protocol::Https,
            uri_style: style,
            host_name: None,
            host_header_value: None,
            bucket_name: bucket.map(str::to_owned),
            access_key_id: "id".to_owned(),
            secret_access_key: "secret".to_owned(),
            security_token: None,
            connect_to: None,
            unbound_tls_version: true,
        }
    }

    #[test]
    fn key_encoding_preserves_slashes() {
        assert_eq!(uri_encode("k/\u{1f511}", false), "k/%F0%9F%94%91");
        assert_eq!(uri_encode("a b+c", false), "a%20b%2Bc");
        assert_eq!(uri_encode("a/b", true), "a%2Fb");
        assert_eq!(uri_encode("safe-._~chars", true), "safe-._~chars");
    }

    #[test]
    fn virtual_host_authority() {
        let uri = compose_uri(&ctx(UriStyle::VirtualHost, Some("b")), "s3.example.com", "k", None, None).unwrap();
        assert_eq!(uri, "https://b.s3.example.com/k");
    }

    #[test]
    fn dotted_bucket_stays_out_of_authority() {
        let uri = compose_uri(&ctx(UriStyle::VirtualHost, Some("my.bucket")), "s3.example.com", "k", None, None).unwrap();
        assert_eq!(uri, "https://s3.example.com/k");
    }

    #[test]
    fn path_style_authority() {
        let uri = compose_uri(&ctx(UriStyle::Path, Some("b")), "s3.example.com", "k", None, None).unwrap();
        assert_eq!(uri, "https://s3.example.com/b/k");
    }

    #[test]
    fn empty_bucket_path_style() {
        let uri = compose_uri(&ctx(UriStyle::Path, None), "s3.example.com", "k", None, None).unwrap();
        assert_eq!(uri, "https://s3.example.com/k");
    }

    #[test]
    fn sub_resource_and_query_params() {
        let c = ctx(UriStyle::Path, Some("b"));
        let uri = compose_uri(&c, "h", "k", Some("acl"), None).unwrap();
        assert_eq!(uri, "https://h/b/k?acl");
        let uri = compose_uri(&c, "h", "k", Some("acl"), Some("versionId=7")).unwrap();
        assert_eq!(uri, "https://h/b/k?acl&versionId=7");
        let uri = compose_uri(&c, "h", "k", None, Some("versionId=7")).unwrap();
        assert_eq!(uri, "https://h/b/k?versionId=7");
    }

    #[test]
    fn oversized_key_is_rejected() {
        let long = "k".repeat(limits::MAX_KEY_SIZE + 1);
        assert_eq!(encode_key(Some(&long)).unwrap_err(), Status::UriTooLong);
        assert_eq!(encode_key(None).unwrap(), "");
    }
}
