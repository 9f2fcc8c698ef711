//! Request status taxonomy
//!
//! A single flat enumeration covers every way a request can end: request
//! preparation failures, transport failures, HTTP status mappings and the
//! error codes an S3-compatible server reports in its error XML body.

use std::fmt;

/// Final (or intermediate) status of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum Status {
    #[default]
    Ok,

    // Engine-level failures
    InternalError,
    OutOfMemory,
    FailedToInitializeRequest,
    InvalidUri,

    // Bucket name validation
    InvalidBucketNameTooLong,
    InvalidBucketNameTooShort,
    InvalidBucketNameFirstCharacter,
    InvalidBucketNameCharacter,
    InvalidBucketNameCharacterSequence,
    InvalidBucketNameDotQuadNotation,

    // Request preparation
    MetaDataHeadersTooLong,
    HeadersTooLong,
    QueryParamsTooLong,
    UriTooLong,
    BadMetaData,
    BadContentType,
    ContentTypeTooLong,
    BadMd5,
    Md5TooLong,
    BadCacheControl,
    CacheControlTooLong,
    BadContentDispositionFilename,
    ContentDispositionFilenameTooLong,
    BadContentEncoding,
    ContentEncodingTooLong,
    BadIfMatchEtag,
    IfMatchEtagTooLong,
    BadIfNotMatchEtag,
    IfNotMatchEtagTooLong,

    // Transport
    NameLookupError,
    FailedToConnect,
    ConnectionFailed,
    ServerFailedVerification,
    AbortedByCallback,
    XmlParseFailure,

    // HTTP status mappings without a server error document
    PermanentRedirect,
    MovedTemporarily,
    BadRequest,
    Forbidden,
    NotFound,
    MethodNotAllowed,
    Conflict,
    MissingContentLength,
    PreconditionFailed,
    InvalidRange,
    NotImplemented,
    SlowDown,
    HttpErrorUnknown,

    // Server error XML codes
    AccessDenied,
    AccountProblem,
    AmbiguousGrantByEmailAddress,
    BadDigest,
    BucketAlreadyExists,
    BucketAlreadyOwnedByYou,
    BucketNotEmpty,
    CredentialsNotSupported,
    EntityTooSmall,
    EntityTooLarge,
    ExpiredToken,
    IncompleteBody,
    InvalidAccessKeyId,
    InvalidArgument,
    InvalidBucketName,
    InvalidDigest,
    InvalidPart,
    InvalidPartOrder,
    InvalidRequest,
    InvalidSecurity,
    InvalidToken,
    KeyTooLong,
    MalformedXml,
    MissingSecurityHeader,
    NoSuchBucket,
    NoSuchKey,
    NoSuchUpload,
    NoSuchVersion,
    OperationAborted,
    QuotaExceeded,
    RequestTimeout,
    RequestTimeTooSkewed,
    ServiceUnavailable,
    SignatureDoesNotMatch,
    TemporaryRedirect,
    TokenRefreshRequired,
    TooManyBuckets,
    ErrorUnknown,
}

impl Status {
    /// Returns true for a successfully completed request.
    #[inline]
    #[must_use]
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }

    /// Maps an HTTP response code to a status, for responses that carried
    /// no parseable error document.
    ///
    /// Returns `None` when the code requires no status change (2xx, and
    /// the stray `100` some HTTP stacks leave behind).
    #[must_use]
    pub fn from_http_code(code: u16) -> Option<Self> {
        if (200..=299).contains(&code) {
            return None;
        }
        Some(match code {
            0 => Self::ConnectionFailed,
            100 => return None,
            301 => Self::PermanentRedirect,
            307 => Self::MovedTemporarily,
            400 => Self::BadRequest,
            403 => Self::Forbidden,
            404 => Self::NotFound,
            405 => Self::MethodNotAllowed,
            409 => Self::Conflict,
            411 => Self::MissingContentLength,
            412 => Self::PreconditionFailed,
            416 => Self::InvalidRange,
            500 => Self::InternalError,
            501 => Self::NotImplemented,
            503 => Self::SlowDown,
            _ => Self::HttpErrorUnknown,
        })
    }

    /// Maps a `<Code>` value from a server error document to a status.
    ///
    /// Unrecognized codes map to [`Status::ErrorUnknown`].
    #[must_use]
    pub fn from_error_code(code: &str) -> Self {
        match code {
            "AccessDenied" => Self::AccessDenied,
            "AccountProblem" => Self::AccountProblem,
            "AmbiguousGrantByEmailAddress" => Self::AmbiguousGrantByEmailAddress,
            "BadDigest" => Self::BadDigest,
            "BucketAlreadyExists" => Self::BucketAlreadyExists,
            "BucketAlreadyOwnedByYou" => Self::BucketAlreadyOwnedByYou,
            "BucketNotEmpty" => Self::BucketNotEmpty,
            "CredentialsNotSupported" => Self::CredentialsNotSupported,
            "EntityTooSmall" => Self::EntityTooSmall,
            "EntityTooLarge" => Self::EntityTooLarge,
            "ExpiredToken" => Self::ExpiredToken,
            "IncompleteBody" => Self::IncompleteBody,
            "InternalError" => Self::InternalError,
            "InvalidAccessKeyId" => Self::InvalidAccessKeyId,
            "InvalidArgument" => Self::InvalidArgument,
            "InvalidBucketName" => Self::InvalidBucketName,
            "InvalidDigest" => Self::InvalidDigest,
            "InvalidPart" => Self::InvalidPart,
            "InvalidPartOrder" => Self::InvalidPartOrder,
            "InvalidRange" => Self::InvalidRange,
            "InvalidRequest" => Self::InvalidRequest,
            "InvalidSecurity" => Self::InvalidSecurity,
            "InvalidToken" => Self::InvalidToken,
            "KeyTooLong" => Self::KeyTooLong,
            "MalformedXML" => Self::MalformedXml,
            "MethodNotAllowed" => Self::MethodNotAllowed,
            "MissingContentLength" => Self::MissingContentLength,
            "MissingSecurityHeader" => Self::MissingSecurityHeader,
            "NoSuchBucket" => Self::NoSuchBucket,
            "NoSuchKey" => Self::NoSuchKey,
            "NoSuchUpload" => Self::NoSuchUpload,
            "NoSuchVersion" => Self::NoSuchVersion,
            "NotImplemented" => Self::NotImplemented,
            "OperationAborted" => Self::OperationAborted,
            "PermanentRedirect" => Self::PermanentRedirect,
            "PreconditionFailed" => Self::PreconditionFailed,
            "QuotaExceeded" => Self::QuotaExceeded,
            "RequestTimeout" => Self::RequestTimeout,
            "RequestTimeTooSkewed" => Self::RequestTimeTooSkewed,
            "ServiceUnavailable" => Self::ServiceUnavailable,
            "SignatureDoesNotMatch" => Self::SignatureDoesNotMatch,
            "SlowDown" => Self::SlowDown,
            "TemporaryRedirect" => Self::TemporaryRedirect,
            "TokenRefreshRequired" => Self::TokenRefreshRequired,
            "TooManyBuckets" => Self::TooManyBuckets,
            _ => Self::ErrorUnknown,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl std::error::Error for Status {}
