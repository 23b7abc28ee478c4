//! Requested credential lifetime.

use std::time::Duration;

use crate::{Error, Result};

/// Parse the requested TTL from the `max_age` and `ttl` request parameters.
///
/// `max_age` (integer seconds) wins over `ttl` (humantime, e.g. `30m`).
/// Absent or zero means `default`. Anything negative, unparsable or above
/// `max` is `InvalidArgument`.
pub fn parse_ttl(
    max_age: Option<&str>,
    ttl: Option<&str>,
    default: Duration,
    max: Duration,
) -> Result<Duration> {
    let requested = match (non_empty(max_age), non_empty(ttl)) {
        (Some(max_age), _) => {
            let secs: i64 = max_age.parse().map_err(|_| {
                Error::invalid_argument(format!("max_age {max_age:?} is not a number of seconds"))
            })?;
            let secs = u64::try_from(secs)
                .map_err(|_| Error::invalid_argument(format!("max_age {secs} is negative")))?;
            Duration::from_secs(secs)
        }
        (None, Some(ttl)) => humantime::parse_duration(ttl)
            .map_err(|e| Error::invalid_argument(format!("ttl {ttl:?} is invalid: {e}")))?,
        (None, None) => Duration::ZERO,
    };

    if requested.is_zero() {
        return Ok(default);
    }
    if requested > max {
        return Err(Error::invalid_argument(format!(
            "ttl {} exceeds the maximum of {}",
            humantime::format_duration(requested),
            humantime::format_duration(max)
        )));
    }
    Ok(requested)
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    const HOUR: Duration = Duration::from_secs(3600);
    const DAY: Duration = Duration::from_secs(86_400);

    #[test]
    fn absent_or_zero_uses_default() {
        assert_eq!(parse_ttl(None, None, HOUR, DAY).unwrap(), HOUR);
        assert_eq!(parse_ttl(Some("0"), None, HOUR, DAY).unwrap(), HOUR);
        assert_eq!(parse_ttl(Some(""), Some("0s"), HOUR, DAY).unwrap(), HOUR);
    }

    #[test]
    fn max_age_wins_over_ttl() {
        let ttl = parse_ttl(Some("120"), Some("5h"), HOUR, DAY).unwrap();
        assert_eq!(ttl, Duration::from_secs(120));
    }

    #[test]
    fn humantime_ttl_is_accepted() {
        assert_eq!(parse_ttl(None, Some("30m"), HOUR, DAY).unwrap(), Duration::from_secs(1800));
        assert_eq!(parse_ttl(None, Some("1day"), HOUR, DAY).unwrap(), DAY);
    }

    #[test]
    fn invalid_values_are_rejected() {
        for (max_age, ttl) in [
            (Some("-5"), None),
            (Some("ten"), None),
            (None, Some("-1h")),
            (None, Some("soon")),
            (None, Some("2days")),
        ] {
            let err = parse_ttl(max_age, ttl, HOUR, DAY).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArgument, "{max_age:?} {ttl:?}");
        }
    }
}
