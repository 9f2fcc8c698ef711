//! Canonical string construction
//!
//! Both signature schemes hash a canonical rendering of the request. V2
//! canonicalizes the `x-amz-*` header block and the resource path; V4
//! canonicalizes the URI, the query string, and the full header set. The
//! byte layouts here must be reproduced exactly or the server rejects the
//! signature.

use std::cmp::Ordering;

use crate::buf::BoundedBuf;
use crate::crypto::hex_sha256;
use crate::headers::ComputedValues;
use crate::limits;
use crate::status::Status;

fn is_blank(c: char) -> bool {
    c == ' ' || c == '\t'
}

/// Compares two byte strings up to a terminator set, the ordering used by
/// every canonicalization sort. A string reaching its terminator first
/// orders before a longer one; both reaching it means equal, which keeps
/// the stable sort stable.
pub(crate) fn cmp_to_terminator(a: &[u8], b: &[u8], is_term: fn(u8) -> bool, fold_case: bool) -> Ordering {
    let mut i = 0;
    loop {
        let ca = a.get(i).copied().filter(|&c| !is_term(c));
        let cb = b.get(i).copied().filter(|&c| !is_term(c));
        match (ca, cb) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(mut x), Some(mut y)) => {
                if fold_case {
                    x = x.to_ascii_lowercase();
                    y = y.to_ascii_lowercase();
                }
                match x.cmp(&y) {
                    Ordering::Equal => i += 1,
                    other => return other,
                }
            }
        }
    }
}

/// Copies a header value, folding every `\r\n` + blank continuation into
/// `fold_separator` (or into nothing), erasing the blanks on both sides
/// of the fold.
fn fold_header_value(value: &str, fold_separator: Option<char>) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while !rest.is_empty() {
        let folded = rest
            .strip_prefix("\r\n")
            .filter(|r| r.starts_with(is_blank))
            .map(|r| r.trim_start_matches(is_blank));
        if let Some(continuation) = folded {
            while out.chars().next_back().is_some_and(is_blank) {
                out.pop();
            }
            if let Some(sep) = fold_separator {
                out.push(sep);
            }
            rest = continuation;
            continue;
        }
        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            out.push(c);
        }
        rest = chars.as_str();
    }
    out
}

/// Canonicalizes the normalized `x-amz-*` lines into the V2 header block:
/// stable-sorted by name, duplicate names merged with `,`, continuation
/// lines folded, one `name:value\n` per logical header.
pub(crate) fn canonicalize_amz_headers(values: &mut ComputedValues) {
    let mut sorted: Vec<&str> = values.amz_headers.iter().map(String::as_str).collect();
    sorted.sort_by(|a, b| cmp_to_terminator(a.as_bytes(), b.as_bytes(), |c| c == b':', false));

    let mut out = String::new();
    let mut run_name: Option<&str> = None;
    for line in sorted {
        let colon = line.find(':').map_or(line.len(), |i| i + 1);
        let (name, rest) = line.split_at(colon);
        let value = rest.strip_prefix(' ').unwrap_or(rest);

        if run_name == Some(name) {
            // Same header again: the previous newline becomes a comma.
            out.pop();
            out.push(',');
        } else {
            out.push_str(name);
            run_name = Some(name);
        }
        out.push_str(&fold_header_value(value, None));
        out.push('\n');
    }
    values.canonicalized_amz_headers = out;
}

/// Builds the V2 canonicalized resource: `/bucket` + `/key` + `?sub`.
pub(crate) fn canonicalize_resource(
    bucket_name: Option<&str>,
    sub_resource: Option<&str>,
    url_encoded_key: &str,
) -> Result<String, Status> {
    let mut buf = BoundedBuf::new(limits::MAX_CANONICALIZED_RESOURCE_SIZE);
    let build = |buf: &mut BoundedBuf| -> Result<(), crate::buf::Overflow> {
        if let Some(bucket) = bucket_name
            && !bucket.is_empty()
        {
            buf.push('/')?;
            buf.push_str(bucket)?;
        }
        buf.push('/')?;
        buf.push_str(url_encoded_key)?;
        if let Some(sub) = sub_resource
            && !sub.is_empty()
        {
            buf.push('?')?;
            buf.push_str(sub)?;
        }
        Ok(())
    };
    build(&mut buf).map_err(|_| Status::UriTooLong)?;
    Ok(buf.into_string())
}

/// Appends the V4 canonical URI (the path, then the canonical query) to
/// the canonical request.
pub(crate) fn canonicalize_uri(buf: &mut BoundedBuf, uri: &str) -> Result<(), Status> {
    let rest = uri.strip_prefix("http").ok_or(Status::InvalidUri)?;
    let rest = rest.strip_prefix('s').unwrap_or(rest);
    let rest = rest.strip_prefix("://").ok_or(Status::InvalidUri)?;
    let path_start = rest.find('/').ok_or(Status::InvalidUri)?;
    let rest = &rest[path_start..];

    let (path, query) = match rest.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (rest, None),
    };
    buf.push_str(path).map_err(|_| Status::UriTooLong)?;
    buf.push('\n').map_err(|_| Status::UriTooLong)?;
    match query {
        Some(query) => canonicalize_query_params(buf, query),
        None => buf.push('\n').map_err(|_| Status::UriTooLong),
    }
}

/// Appends the V4 canonical query string: parameters stable-sorted by
/// name, `=` appended to bare parameters, joined with `&`, `\n`
/// terminated.
pub(crate) fn canonicalize_query_params(buf: &mut BoundedBuf, query: &str) -> Result<(), Status> {
    let mut entries: Vec<&str> = Vec::new();
    for (i, entry) in query.split('&').enumerate() {
        if i > 0 && (entry.is_empty() || entry.starts_with('=')) {
            return Err(Status::BadMetaData);
        }
        entries.push(entry);
    }
    entries.sort_by(|a, b| cmp_to_terminator(a.as_bytes(), b.as_bytes(), |c| c == b'=' || c == b'&', false));

    for (i, entry) in entries.iter().enumerate() {
        if i > 0 {
            buf.push('&').map_err(|_| Status::QueryParamsTooLong)?;
        }
        buf.push_str(entry).map_err(|_| Status::QueryParamsTooLong)?;
        if !entry.contains('=') {
            buf.push('=').map_err(|_| Status::QueryParamsTooLong)?;
        }
    }
    buf.push('\n').map_err(|_| Status::QueryParamsTooLong)
}

/// Appends the V4 canonical headers block, the blank separator line and
/// the signed-headers list; also records the signed-headers list in the
/// computed values.
///
/// `content-length` never participates in signing.
pub(crate) fn canonicalize_headers(
    buf: &mut BoundedBuf,
    headers: &[(String, String)],
    values: &mut ComputedValues,
) -> Result<(), Status> {
    let mut filtered: Vec<(&str, &str)> = headers
        .iter()
        .filter(|(name, _)| !name.eq_ignore_ascii_case("content-length"))
        .map(|(name, value)| (name.as_str(), value.as_str()))
        .collect();
    filtered.sort_by(|a, b| cmp_to_terminator(a.0.as_bytes(), b.0.as_bytes(), |_| false, true));

    let mut signed = BoundedBuf::new(limits::MAX_SIGNED_HEADERS_SIZE);
    let mut run_name: Option<String> = None;
    for (name, value) in filtered {
        let lower = name.to_ascii_lowercase();
        if run_name.as_deref() == Some(lower.as_str()) {
            // Same header again: the previous newline becomes a comma.
            buf.replace_last(',');
        } else {
            if signed.len() > 0 {
                signed.push(';').map_err(|_| Status::HeadersTooLong)?;
            }
            signed.push_str(&lower).map_err(|_| Status::HeadersTooLong)?;
            buf.push_str(&lower).map_err(|_| Status::HeadersTooLong)?;
            buf.push(':').map_err(|_| Status::HeadersTooLong)?;
            run_name = Some(lower);
        }
        let value = value.trim_start_matches(is_blank);
        buf.push_str(&fold_header_value(value, Some(','))).map_err(|_| Status::HeadersTooLong)?;
        buf.push('\n').map_err(|_| Status::HeadersTooLong)?;
    }

    buf.push('\n').map_err(|_| Status::HeadersTooLong)?;
    buf.push_str(signed.as_str()).map_err(|_| Status::HeadersTooLong)?;
    buf.push('\n').map_err(|_| Status::HeadersTooLong)?;
    values.signed_headers = signed.into_string();
    Ok(())
}

/// Assembles the V4 canonical request and returns the lowercase hex
/// SHA-256 of it.
pub(crate) fn canonical_request_hash(
    verb: &str,
    uri: &str,
    headers: &[(String, String)],
    payload_hash: &str,
    values: &mut ComputedValues,
) -> Result<String, Status> {
    let mut creq = BoundedBuf::new(limits::MAX_CANONICAL_REQUEST_SIZE);
    creq.push_str(verb).map_err(|_| Status::HeadersTooLong)?;
    creq.push('\n').map_err(|_| Status::HeadersTooLong)?;
    canonicalize_uri(&mut creq, uri)?;
    canonicalize_headers(&mut creq, headers, values)?;
    creq.push_str(payload_hash).map_err(|_| Status::HeadersTooLong)?;
    Ok(hex_sha256(creq.as_str().as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values_with(lines: &[&str]) -> ComputedValues {
        ComputedValues {
            amz_headers: lines.iter().map(|s| (*s).to_owned()).collect(),
            ..ComputedValues::default()
        }
    }

    #[test]
    fn amz_headers_sorted_and_merged() {
        let mut values = values_with(&[
            "x-amz-meta-b: second",
            "x-amz-date: 20130524T000000Z",
            "x-amz-meta-a: first",
            "x-amz-meta-b: third",
        ]);
        canonicalize_amz_headers(&mut values);
        assert_eq!(
            values.canonicalized_amz_headers,
            "x-amz-date:20130524T000000Z\nx-amz-meta-a:first\nx-amz-meta-b:second,third\n"
        );
    }

    #[test]
    fn amz_headers_stable_across_permutations() {
        let base = [
            "x-amz-meta-z: 1",
            "x-amz-acl: public-read",
            "x-amz-date: d",
            "x-amz-meta-a: 2",
        ];
        let mut expected = None;
        // A few rotations stand in for all permutations.
        for rotation in 0..base.len() {
            let mut rotated = base.to_vec();
            rotated.rotate_left(rotation);
            let mut values = values_with(&rotated);
            canonicalize_amz_headers(&mut values);
            let got = values.canonicalized_amz_headers;
            match &expected {
                None => expected = Some(got),
                Some(e) => assert_eq!(e, &got),
            }
        }
    }

    #[test]
    fn amz_header_line_folding() {
        let mut values = values_with(&["x-amz-meta-note: one \r\n\t two"]);
        canonicalize_amz_headers(&mut values);
        assert_eq!(values.canonicalized_amz_headers, "x-amz-meta-note:onetwo\n");
    }

    #[test]
    fn resource_with_percent_encoded_key() {
        let resource = canonicalize_resource(Some("b"), None, "k/%F0%9F%94%91").unwrap();
        assert_eq!(resource, "/b/k/%F0%9F%94%91");
    }

    #[test]
    fn resource_edge_cases() {
        assert_eq!(canonicalize_resource(None, None, "").unwrap(), "/");
        assert_eq!(canonicalize_resource(Some("b"), Some("acl"), "k").unwrap(), "/b/k?acl");
        assert_eq!(canonicalize_resource(None, Some("uploads"), "k").unwrap(), "/k?uploads");
    }

    #[test]
    fn canonical_uri_splits_path_and_query() {
        let mut buf = BoundedBuf::new(256);
        canonicalize_uri(&mut buf, "https://h.example.com/b/k?b=2&a=1").unwrap();
        assert_eq!(buf.as_str(), "/b/k\na=1&b=2\n");

        let mut buf = BoundedBuf::new(256);
        canonicalize_uri(&mut buf, "http://h/path").unwrap();
        assert_eq!(buf.as_str(), "/path\n\n");
    }

    #[test]
    fn query_params_sorted_with_empty_values() {
        let mut buf = BoundedBuf::new(256);
        canonicalize_query_params(&mut buf, "uploads&prefix=p&delimiter=%2F").unwrap();
        assert_eq!(buf.as_str(), "delimiter=%2F&prefix=p&uploads=\n");
    }

    #[test]
    fn query_params_reject_malformed() {
        let mut buf = BoundedBuf::new(256);
        assert_eq!(canonicalize_query_params(&mut buf, "a=1&&b=2").unwrap_err(), Status::BadMetaData);
        let mut buf = BoundedBuf::new(256);
        assert_eq!(canonicalize_query_params(&mut buf, "a=1&=2").unwrap_err(), Status::BadMetaData);
        let mut buf = BoundedBuf::new(256);
        assert_eq!(canonicalize_query_params(&mut buf, "a=1&").unwrap_err(), Status::BadMetaData);
    }

    fn header_pairs(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs.iter().map(|(n, v)| ((*n).to_owned(), (*v).to_owned())).collect()
    }

    #[test]
    fn headers_sorted_case_insensitively() {
        let headers = header_pairs(&[
            ("Host", "h.example.com"),
            ("x-amz-date", "20130524T000000Z"),
            ("Content-Type", "text/plain"),
        ]);
        let mut buf = BoundedBuf::new(1024);
        let mut values = ComputedValues::default();
        canonicalize_headers(&mut buf, &headers, &mut values).unwrap();
        assert_eq!(
            buf.as_str(),
            "content-type:text/plain\nhost:h.example.com\nx-amz-date:20130524T000000Z\n\ncontent-type;host;x-amz-date\n"
        );
        assert_eq!(values.signed_headers, "content-type;host;x-amz-date");
    }

    #[test]
    fn content_length_never_signed() {
        let headers = header_pairs(&[("Content-Length", "10"), ("Host", "h")]);
        let mut buf = BoundedBuf::new(1024);
        let mut values = ComputedValues::default();
        canonicalize_headers(&mut buf, &headers, &mut values).unwrap();
        assert_eq!(buf.as_str(), "host:h\n\nhost\n");
    }

    #[test]
    fn duplicate_headers_fold_into_one_line() {
        let headers = header_pairs(&[("X-Custom", "a"), ("x-custom", "b"), ("Host", "h")]);
        let mut buf = BoundedBuf::new(1024);
        let mut values = ComputedValues::default();
        canonicalize_headers(&mut buf, &headers, &mut values).unwrap();
        assert_eq!(buf.as_str(), "host:h\nx-custom:a,b\n\nhost;x-custom\n");
    }

    #[test]
    fn header_value_folding_uses_comma() {
        let headers = header_pairs(&[("X-Note", "  one \r\n two")]);
        let mut buf = BoundedBuf::new(1024);
        let mut values = ComputedValues::default();
        canonicalize_headers(&mut buf, &headers, &mut values).unwrap();
        assert_eq!(buf.as_str(), "x-note:one,two\n\nx-note\n");
    }

    #[test]
    fn request_hash_is_deterministic() {
        let headers = header_pairs(&[("Host", "h"), ("x-amz-date", "20130524T000000Z")]);
        let mut v1 = ComputedValues::default();
        let mut v2 = ComputedValues::default();
        let h1 = canonical_request_hash("GET", "https://h/k", &headers, "UNSIGNED-PAYLOAD", &mut v1).unwrap();
        let h2 = canonical_request_hash("GET", "https://h/k", &headers, "UNSIGNED-PAYLOAD", &mut v2).unwrap();
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
        assert_eq!(v1.signed_headers, "host;x-amz-date");
    }

    #[test]
    fn terminator_comparator_orders_prefixes_first() {
        let term = |c: u8| c == b':';
        assert_eq!(cmp_to_terminator(b"a:", b"ab:", term, false), Ordering::Less);
        assert_eq!(cmp_to_terminator(b"ab:", b"a:", term, false), Ordering::Greater);
        assert_eq!(cmp_to_terminator(b"a: x", b"a: y", term, false), Ordering::Equal);
        assert_eq!(cmp_to_terminator(b"B", b"a", |_| false, true), Ordering::Less);
    }
}
