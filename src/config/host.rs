//! # Host Defaults and Derived Views
//!
//! Locale, time-zone, and date-formatter support for the configuration
//! facade. The store persists plain strings (language, country, time-zone
//! id, format patterns); this module turns them into usable instances and
//! supplies the host defaults a freshly created store starts from.
//!
//! Time-zone ids resolve to fixed offsets: `UTC`, `GMT`, `Z`, and
//! offset forms such as `UTC+02:00` or `-05:30`. Date parsing is strict
//! by construction: chrono rejects any input that does not match the
//! pattern exactly, so there is no lenient field rollover to disable.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Utc};
use eyre::Result;

/// A language/country pair, the engine's unit of collation and
/// formatting defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locale {
    language: String,
    country: String,
}

impl Locale {
    pub fn new(language: impl Into<String>, country: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            country: country.into(),
        }
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn country(&self) -> &str {
        &self.country
    }
}

impl std::fmt::Display for Locale {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.country.is_empty() {
            write!(f, "{}", self.language)
        } else {
            write!(f, "{}_{}", self.language, self.country)
        }
    }
}

/// The host's locale, from `LC_ALL`/`LANG` (e.g. `en_US.UTF-8`).
pub fn host_locale() -> Locale {
    let raw = std::env::var("LC_ALL")
        .or_else(|_| std::env::var("LANG"))
        .unwrap_or_default();

    let raw = raw.split(['.', '@']).next().unwrap_or("");
    if raw.is_empty() || raw == "C" || raw == "POSIX" {
        return Locale::new("en", "");
    }

    match raw.split_once('_') {
        Some((language, country)) => Locale::new(language, country),
        None => Locale::new(raw, ""),
    }
}

/// The host's time-zone id, from `TZ`, defaulting to UTC.
pub fn host_time_zone() -> String {
    std::env::var("TZ").unwrap_or_else(|_| "UTC".to_string())
}

/// The host's processor count.
pub fn available_cpus() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1)
}

/// Resolves a time-zone id to a fixed offset, or `None` when the id is
/// not understood.
pub fn resolve_time_zone(id: &str) -> Option<FixedOffset> {
    match id {
        "UTC" | "GMT" | "Z" => return FixedOffset::east_opt(0),
        _ => {}
    }

    let offset = id
        .strip_prefix("UTC")
        .or_else(|| id.strip_prefix("GMT"))
        .unwrap_or(id);

    let (sign, rest) = match offset.as_bytes().first()? {
        b'+' => (1, &offset[1..]),
        b'-' => (-1, &offset[1..]),
        _ => return None,
    };

    let (hours, minutes) = rest.split_once(':')?;
    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    if hours > 14 || minutes > 59 {
        return None;
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

/// A date or date-time formatter bound to a pattern and a time zone.
///
/// Instances are cheap and single-use by design: the facade builds a
/// fresh one per call, so no shared mutable state exists between threads.
#[derive(Debug, Clone)]
pub struct DateFormatter {
    pattern: String,
    time_zone_id: String,
    offset: FixedOffset,
}

impl DateFormatter {
    pub fn new(
        pattern: impl Into<String>,
        time_zone_id: impl Into<String>,
        offset: FixedOffset,
    ) -> Self {
        Self {
            pattern: pattern.into(),
            time_zone_id: time_zone_id.into(),
            offset,
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn time_zone_id(&self) -> &str {
        &self.time_zone_id
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Renders an instant in the formatter's time zone.
    pub fn format(&self, instant: DateTime<Utc>) -> String {
        instant
            .with_timezone(&self.offset)
            .format(&self.pattern)
            .to_string()
    }

    /// Parses a calendar date. Strict: the input must match the pattern
    /// exactly.
    pub fn parse_date(&self, text: &str) -> Result<NaiveDate> {
        NaiveDate::parse_from_str(text, &self.pattern)
            .map_err(|e| eyre::eyre!("cannot parse date '{}' with pattern '{}': {}", text, self.pattern, e))
    }

    /// Parses a date-time in the formatter's time zone. Strict.
    pub fn parse_date_time(&self, text: &str) -> Result<DateTime<FixedOffset>> {
        let naive = NaiveDateTime::parse_from_str(text, &self.pattern).map_err(|e| {
            eyre::eyre!(
                "cannot parse date-time '{}' with pattern '{}': {}",
                text,
                self.pattern,
                e
            )
        })?;

        naive
            .and_local_timezone(self.offset)
            .single()
            .ok_or_else(|| eyre::eyre!("date-time '{}' is not unique in zone '{}'", text, self.time_zone_id))
    }
}
