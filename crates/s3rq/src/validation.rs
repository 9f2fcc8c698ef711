//! Bucket name validation
//!
//! Virtual-host addressing puts the bucket name in DNS, so it gets the
//! strict DNS-label rules; path-style addressing only has to fit in the
//! URI path.

use crate::dto::UriStyle;
use crate::limits;
use crate::status::Status;

/// Validates a bucket name for the given addressing style.
///
/// # Errors
/// Returns the specific `InvalidBucketName*` status describing the first
/// violation found.
pub fn validate_bucket_name(name: &str, uri_style: UriStyle) -> Result<(), Status> {
    let bytes = name.as_bytes();

    if uri_style == UriStyle::Path {
        if bytes.len() > limits::MAX_BUCKET_NAME_SIZE {
            return Err(Status::InvalidBucketNameTooLong);
        }
        if bytes.is_empty() {
            return Err(Status::InvalidBucketNameTooShort);
        }
        for &b in bytes {
            if !(b.is_ascii_alphanumeric() || b == b'.' || b == b'-' || b == b'_') {
                return Err(Status::InvalidBucketNameCharacter);
            }
        }
        return Ok(());
    }

    // Virtual-host style: the bucket becomes a DNS label sequence.
    if bytes.len() > 63 {
        return Err(Status::InvalidBucketNameTooLong);
    }
    if bytes.len() < 3 {
        return Err(Status::InvalidBucketNameTooShort);
    }
    if !(bytes[0].is_ascii_lowercase() || bytes[0].is_ascii_digit()) {
        return Err(Status::InvalidBucketNameFirstCharacter);
    }
    for &b in bytes {
        if !(b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'.' || b == b'-') {
            return Err(Status::InvalidBucketNameCharacter);
        }
    }
    if name.ends_with('.') || name.ends_with('-') {
        return Err(Status::InvalidBucketNameCharacterSequence);
    }
    if name.contains("..") || name.contains(".-") || name.contains("-.") {
        return Err(Status::InvalidBucketNameCharacterSequence);
    }
    if is_dotted_quad(name) {
        return Err(Status::InvalidBucketNameDotQuadNotation);
    }
    Ok(())
}

/// True for names shaped like an IPv4 address (`192.168.5.4`).
fn is_dotted_quad(name: &str) -> bool {
    let labels: Vec<&str> = name.split('.').collect();
    labels.len() == 4 && labels.iter().all(|l| !l.is_empty() && l.bytes().all(|b| b.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn virtual_host_rules() {
        assert!(validate_bucket_name("my-bucket", UriStyle::VirtualHost).is_ok());
        assert!(validate_bucket_name("my.bucket.7", UriStyle::VirtualHost).is_ok());
        assert_eq!(
            validate_bucket_name("ab", UriStyle::VirtualHost).unwrap_err(),
            Status::InvalidBucketNameTooShort
        );
        assert_eq!(
            validate_bucket_name(&"a".repeat(64), UriStyle::VirtualHost).unwrap_err(),
            Status::InvalidBucketNameTooLong
        );
        assert_eq!(
            validate_bucket_name("-bucket", UriStyle::VirtualHost).unwrap_err(),
            Status::InvalidBucketNameFirstCharacter
        );
        assert_eq!(
            validate_bucket_name("My-Bucket", UriStyle::VirtualHost).unwrap_err(),
            Status::InvalidBucketNameFirstCharacter
        );
        assert_eq!(
            validate_bucket_name("bu_cket", UriStyle::VirtualHost).unwrap_err(),
            Status::InvalidBucketNameCharacter
        );
        assert_eq!(
            validate_bucket_name("bu..cket", UriStyle::VirtualHost).unwrap_err(),
            Status::InvalidBucketNameCharacterSequence
        );
        assert_eq!(
            validate_bucket_name("bucket-", UriStyle::VirtualHost).unwrap_err(),
            Status::InvalidBucketNameCharacterSequence
        );
        assert_eq!(
            validate_bucket_name("192.168.5.4", UriStyle::VirtualHost).unwrap_err(),
            Status::InvalidBucketNameDotQuadNotation
        );
    }

    #[test]
    fn path_style_is_lenient() {
        assert!(validate_bucket_name("My_Bucket", UriStyle::Path).is_ok());
        assert!(validate_bucket_name("192.168.5.4", UriStyle::Path).is_ok());
        assert_eq!(
            validate_bucket_name("bad bucket", UriStyle::Path).unwrap_err(),
            Status::InvalidBucketNameCharacter
        );
        assert_eq!(
            validate_bucket_name(&"a".repeat(256), UriStyle::Path).unwrap_err(),
            Status::InvalidBucketNameTooLong
        );
    }
}
