//! Authorization header production
//!
//! V2 signs an HMAC-SHA1 over verb, content headers, the canonicalized
//! `amz` block and the canonicalized resource. V4 signs an HMAC-SHA256
//! over a scoped string-to-sign that embeds the canonical request hash,
//! with the derived signing key chain.

use crate::buf::BoundedBuf;
use crate::canonical::canonical_request_hash;
use crate::crypto::{base64, hmac_sha1, hmac_sha256};
use crate::headers::ComputedValues;
use crate::limits;
use crate::status::Status;

const SERVICE: &str = "s3";
const TERMINATOR: &str = "aws4_request";

/// Builds the V2 `Authorization` header value (`AWS <id>:<signature>`)
/// into the computed values.
///
/// The date line of the string-to-sign is intentionally empty: the
/// `x-amz-date` header supersedes it.
pub(crate) fn compose_v2_auth_header(
    access_key_id: &str,
    secret_access_key: &str,
    verb: &str,
    values: &mut ComputedValues,
) -> Result<(), Status> {
    let mut signbuf = BoundedBuf::new(
        32 + limits::MAX_STANDARD_HEADER_SIZE * 2 + limits::MAX_AMZ_HEADERS_SIZE + limits::MAX_CANONICALIZED_RESOURCE_SIZE,
    );
    let build = |buf: &mut BoundedBuf| -> Result<(), crate::buf::Overflow> {
        buf.push_fmt(format_args!("{verb}\n"))?;
        buf.push_fmt(format_args!("{}\n", values.md5))?;
        buf.push_fmt(format_args!("{}\n", values.content_type))?;
        buf.push('\n')?;
        buf.push_str(&values.canonicalized_amz_headers)?;
        buf.push_str(&values.canonicalized_resource)
    };
    build(&mut signbuf).map_err(|_| Status::HeadersTooLong)?;

    let hmac = hmac_sha1(secret_access_key.as_bytes(), signbuf.as_str().as_bytes());
    values.authorization = format!("AWS {access_key_id}:{}", base64(&hmac));
    Ok(())
}

/// The V2 string-to-sign of a presigned GET URL.
pub(crate) fn v2_presign_string_to_sign(expires: i64, canonicalized_resource: &str) -> String {
    format!("GET\n\n\n{expires}\n{canonicalized_resource}")
}

/// Signs a V2 string-to-sign, returning the base64 signature.
pub(crate) fn v2_signature(secret_access_key: &str, string_to_sign: &str) -> String {
    base64(&hmac_sha1(secret_access_key.as_bytes(), string_to_sign.as_bytes()))
}

/// The scope line `YYYYMMDD/region/s3/aws4_request\n` of the V4
/// string-to-sign.
pub(crate) fn v4_scope_line(timestamp: &str, region: &str) -> String {
    let date = timestamp.get(..8).unwrap_or(timestamp);
    format!("{date}/{region}/{SERVICE}/{TERMINATOR}\n")
}

/// Derives the chained V4 signing key for the request date and region.
fn v4_signing_key(secret_access_key: &str, timestamp: &str, region: &str) -> [u8; 32] {
    let date = timestamp.get(..8).unwrap_or(timestamp);
    let date_key = hmac_sha256(format!("AWS4{secret_access_key}").as_bytes(), date.as_bytes());
    let region_key = hmac_sha256(&date_key, region.as_bytes());
    let service_key = hmac_sha256(&region_key, SERVICE.as_bytes());
    hmac_sha256(&service_key, TERMINATOR.as_bytes())
}

/// Computes the V4 `Authorization` header value for the fully composed
/// request: hashes the canonical request, assembles the string-to-sign,
/// derives the signing key and renders the credential/signed-headers/
/// signature triple.
pub(crate) fn compose_v4_auth_header(
    access_key_id: &str,
    secret_access_key: &str,
    region: &str,
    verb: &str,
    uri: &str,
    headers: &[(String, String)],
    payload_hash: &str,
    values: &mut ComputedValues,
) -> Result<String, Status> {
    let request_hash = canonical_request_hash(verb, uri, headers, payload_hash, values)?;

    let mut string_to_sign = String::with_capacity(128);
    string_to_sign.push_str("AWS4-HMAC-SHA256\n");
    string_to_sign.push_str(&values.timestamp);
    string_to_sign.push('\n');
    string_to_sign.push_str(&v4_scope_line(&values.timestamp, region));
    string_to_sign.push_str(&request_hash);

    let signing_key = v4_signing_key(secret_access_key, &values.timestamp, region);
    let signature = hmac_sha256(&signing_key, string_to_sign.as_bytes());
    let signature_hex = hex_simd::encode_to_string(signature, hex_simd::AsciiCase::Lower);

    let date = values.timestamp.get(..8).unwrap_or(&values.timestamp);
    Ok(format!(
        "AWS4-HMAC-SHA256 Credential={access_key_id}/{date}/{region}/{SERVICE}/{TERMINATOR}, \
         SignedHeaders={}, Signature={signature_hex}",
        values.signed_headers
    ))
}

/// The payload hash declared for signing: the caller-supplied digest, or
/// the literal `UNSIGNED-PAYLOAD`.
pub(crate) fn payload_hash(content_sha256: Option<&str>) -> &str {
    content_sha256.filter(|s| !s.is_empty()).unwrap_or("UNSIGNED-PAYLOAD")
}
