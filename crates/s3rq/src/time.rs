//! Date formatting
//!
//! Three textual date formats appear on the wire: RFC 1123 with a `GMT`
//! suffix for the `x-amz-date` header under V2, the same layout with a
//! `UTC` suffix for `Expires` and the `If-*-Since` conditionals, and the
//! compact ISO 8601 form (`yyyymmddThhmmssZ`) required by Signature V4.

use crate::status::Status;

use time::OffsetDateTime;
use time::PrimitiveDateTime;
use time::format_description::FormatItem;
use time::macros::format_description;

/// See <https://github.com/time-rs/time/issues/498>
const RFC1123_GMT: &[FormatItem<'_>] =
    format_description!("[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT");

const RFC1123_UTC: &[FormatItem<'_>] =
    format_description!("[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] UTC");

const ISO8601_BASIC: &[FormatItem<'_>] = format_description!("[year][month][day]T[hour][minute][second]Z");

/// RFC 1123 with the `GMT` suffix, used for the V2 `x-amz-date` header.
pub(crate) fn format_http_date(t: OffsetDateTime) -> Result<String, Status> {
    t.format(RFC1123_GMT).map_err(|_| Status::InternalError)
}

/// RFC 1123 with the `UTC` suffix, used for `Expires` and `If-*-Since`.
pub(crate) fn format_header_time(epoch_seconds: i64) -> Result<String, Status> {
    let t = OffsetDateTime::from_unix_timestamp(epoch_seconds).map_err(|_| Status::InternalError)?;
    t.format(RFC1123_UTC).map_err(|_| Status::InternalError)
}

/// Compact ISO 8601 (`yyyymmddThhmmssZ`), used as the V4 timestamp.
pub(crate) fn format_amz_timestamp(t: OffsetDateTime) -> Result<String, Status> {
    t.format(ISO8601_BASIC).map_err(|_| Status::InternalError)
}

/// Parses an RFC 1123 `Last-Modified` value into epoch seconds.
pub(crate) fn parse_http_date(s: &str) -> Option<i64> {
    let t = PrimitiveDateTime::parse(s, RFC1123_GMT).ok()?;
    Some(t.assume_utc().unix_timestamp())
}
