//! Formatting for publication timestamps. The backend reports timestamps like
//! `2021-03-15T19:25:28+0000`; pages show them in a localized short form such
//! as `15 mar 2021`.

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, FixedOffset, Locale};
use std::fmt;

/// The default `strftime` pattern for publication dates.
pub const DEFAULT_PATTERN: &str = "%-d %b %Y";

/// The default locale for publication dates.
pub const DEFAULT_LOCALE: &str = "pt_BR";

/// A `strftime` pattern paired with the locale used for month and day names.
#[derive(Clone, Debug)]
pub struct DateFormat {
    pub pattern: String,
    pub locale: Locale,
}

impl Default for DateFormat {
    fn default() -> Self {
        DateFormat {
            pattern: DEFAULT_PATTERN.to_owned(),
            locale: Locale::pt_BR,
        }
    }
}

impl DateFormat {
    /// Builds a [`DateFormat`] from a pattern and a locale name such as
    /// `pt_BR` or `en_US`. Fails for unknown locales and for patterns with
    /// unrecognized specifiers.
    pub fn new(pattern: &str, locale: &str) -> Result<DateFormat, Error> {
        let locale =
            Locale::try_from(locale).map_err(|_| Error::UnknownLocale(locale.to_owned()))?;
        if StrftimeItems::new(pattern).any(|item| matches!(item, Item::Error)) {
            return Err(Error::InvalidPattern(pattern.to_owned()));
        }
        Ok(DateFormat {
            pattern: pattern.to_owned(),
            locale,
        })
    }

    /// Formats an optional backend timestamp. Missing or unparsable
    /// timestamps format as the empty string.
    pub fn format(&self, timestamp: Option<&str>) -> String {
        match timestamp.and_then(parse_timestamp) {
            Some(date) => date
                .format_localized(&self.pattern, self.locale)
                .to_string(),
            None => String::new(),
        }
    }
}

/// Parses a backend timestamp. Both RFC 3339 (`+00:00`) and the compact
/// offset form (`+0000`) are accepted.
pub fn parse_timestamp(s: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(s)
        .or_else(|_| DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%z"))
        .ok()
}

/// Returned by [`DateFormat::new`] for settings that can't format dates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The locale name isn't one chrono knows.
    UnknownLocale(String),

    /// The pattern contains a specifier chrono can't format.
    InvalidPattern(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::UnknownLocale(locale) => write!(f, "Unknown date locale `{}`", locale),
            Error::InvalidPattern(pattern) => write!(f, "Invalid date format `{}`", pattern),
        }
    }
}

impl std::error::Error for Error {}
