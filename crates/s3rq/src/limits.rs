//! Size bounds for request composition
//!
//! Every buffer the engine writes while composing a request is bounded.
//! Exceeding a bound surfaces as a distinct [`Status`](crate::Status)
//! variant instead of an unbounded allocation.

/// Maximum length of an object key, before URL encoding.
pub const MAX_KEY_SIZE: usize = 1024;

/// Maximum length of a URL-encoded object key (worst case is 3 bytes per
/// input byte).
pub const MAX_URLENCODED_KEY_SIZE: usize = MAX_KEY_SIZE * 3;

/// Maximum length of a host name or region name.
pub const MAX_HOSTNAME_SIZE: usize = 255;

/// Maximum length of a bucket name (path-style addressing).
pub const MAX_BUCKET_NAME_SIZE: usize = 255;

/// Maximum number of user metadata entries on a single request.
pub const MAX_METADATA_COUNT: usize = 58;

/// Total byte budget for all composed `x-amz-*` header lines of one
/// request. Covers user metadata, the ACL, date, content hash, copy
/// source headers and the security token.
pub const MAX_AMZ_HEADERS_SIZE: usize = 2048 + 256 + 4096;

/// Byte budget for a single composed standard header, name included.
pub const MAX_STANDARD_HEADER_SIZE: usize = 128;

/// Maximum length of the V2 canonicalized resource string.
pub const MAX_CANONICALIZED_RESOURCE_SIZE: usize = MAX_URLENCODED_KEY_SIZE + MAX_BUCKET_NAME_SIZE + 256;

/// Maximum length of a composed request URI.
pub const MAX_URI_SIZE: usize = MAX_URLENCODED_KEY_SIZE + MAX_HOSTNAME_SIZE + MAX_BUCKET_NAME_SIZE + 512;

/// Maximum length of the V4 canonical request.
pub const MAX_CANONICAL_REQUEST_SIZE: usize = 20480;

/// Maximum length of the `;`-joined signed headers list.
pub const MAX_SIGNED_HEADERS_SIZE: usize = 4096;

/// Maximum length of a presigned (authenticated) query string URI.
pub const MAX_AUTHENTICATED_QUERY_STRING_SIZE: usize = MAX_URI_SIZE + 1024;
