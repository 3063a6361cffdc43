//! Composite item identifiers.
//!
//! An identifier addresses a processed item and sorts by publication date:
//!
//! ```text
//! [t<epochMillis>__]YYYY__MM__DD__<lang>__<site>__<publisher>__<postType>__<originalId>
//! ```
//!
//! The leading `t<epochMillis>` marker is optional and records when the
//! identifier was created.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{EngineError, EngineResult};

/// Delimiter between identifier fields. Never allowed inside a field.
pub const SEPARATOR: &str = "__";

const CREATED_MARKER: char = 't';
const FIELD_COUNT: usize = 8;

/// Decoded identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identifier {
    /// Creation timestamp, present only when the `t<ms>` marker was supplied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_created: Option<DateTime<Utc>>,
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub source_language: String,
    pub site_identifier: String,
    pub publisher_name: String,
    pub post_type: String,
    pub original_id: String,
}

impl Identifier {
    /// Build an identifier from a publication date (UTC calendar fields).
    pub fn new(
        date: &DateTime<Utc>,
        source_language: impl Into<String>,
        publisher_name: impl Into<String>,
        site_identifier: impl Into<String>,
        post_type: impl Into<String>,
        original_id: impl Into<String>,
    ) -> EngineResult<Self> {
        let identifier = Self {
            date_created: None,
            year: date.year(),
            month: date.month(),
            day: date.day(),
            source_language: source_language.into(),
            site_identifier: site_identifier.into(),
            publisher_name: publisher_name.into(),
            post_type: post_type.into(),
            original_id: original_id.into(),
        };
        identifier.validate()?;
        Ok(identifier)
    }

    /// Attach a creation timestamp, emitted as the `t<ms>` marker.
    pub fn with_date_created(mut self, created: DateTime<Utc>) -> Self {
        self.date_created = Some(created);
        self
    }

    fn text_fields(&self) -> [(&'static str, &str); 5] {
        [
            ("source_language", &self.source_language),
            ("site_identifier", &self.site_identifier),
            ("publisher_name", &self.publisher_name),
            ("post_type", &self.post_type),
            ("original_id", &self.original_id),
        ]
    }

    fn validate(&self) -> EngineResult<()> {
        let fields = self.text_fields();
        let last = fields.len() - 1;
        for (position, (name, value)) in fields.into_iter().enumerate() {
            if value.contains(SEPARATOR) {
                return Err(EngineError::Identifier(format!(
                    "field `{}` contains the separator `{}`: {}",
                    name, SEPARATOR, value
                )));
            }
            // A trailing `_` would merge with the following separator and
            // shift into the next field on parse.
            if position != last && value.ends_with('_') {
                return Err(EngineError::Identifier(format!(
                    "field `{}` must not end with `_`: {}",
                    name, value
                )));
            }
        }
        Ok(())
    }

    /// Hierarchical storage path for this identifier.
    pub fn path(&self) -> String {
        path_from_identifier(&self.to_string())
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(created) = self.date_created {
            write!(f, "{}{}{}", CREATED_MARKER, created.timestamp_millis(), SEPARATOR)?;
        }
        write!(
            f,
            "{:04}{sep}{:02}{sep}{:02}{sep}{}{sep}{}{sep}{}{sep}{}{sep}{}",
            self.year,
            self.month,
            self.day,
            self.source_language,
            self.site_identifier,
            self.publisher_name,
            self.post_type,
            self.original_id,
            sep = SEPARATOR,
        )
    }
}

impl std::str::FromStr for Identifier {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse(s)
    }
}

/// Encode an identifier string from its parts.
pub fn stringify(
    date: &DateTime<Utc>,
    source_language: &str,
    publisher_name: &str,
    site_identifier: &str,
    post_type: &str,
    original_id: &str,
) -> EngineResult<String> {
    Identifier::new(
        date,
        source_language,
        publisher_name,
        site_identifier,
        post_type,
        original_id,
    )
    .map(|id| id.to_string())
}

/// Parse a publication date given as RFC 3339 (`2021-03-07T23:30:00Z`) or
/// as a plain calendar date (`2021-03-07`, taken as UTC midnight).
pub fn parse_date(text: &str) -> EngineResult<DateTime<Utc>> {
    if let Ok(date) = DateTime::parse_from_rfc3339(text) {
        return Ok(date.with_timezone(&Utc));
    }
    chrono::NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| EngineError::Identifier(format!("invalid publication date `{}`", text)))
}

/// Decode an identifier string.
pub fn parse(identifier: &str) -> EngineResult<Identifier> {
    let mut fields: Vec<&str> = identifier.split(SEPARATOR).collect();

    let date_created = match fields.first() {
        Some(first) if is_created_marker(first) => {
            let millis: i64 = first[1..]
                .parse()
                .map_err(|e| EngineError::Identifier(format!("invalid creation marker `{}`: {}", first, e)))?;
            let created = DateTime::<Utc>::from_timestamp_millis(millis).ok_or_else(|| {
                EngineError::Identifier(format!("creation timestamp out of range: {}", millis))
            })?;
            fields.remove(0);
            Some(created)
        }
        _ => None,
    };

    if fields.len() != FIELD_COUNT {
        return Err(EngineError::Identifier(format!(
            "expected {} fields, found {} in `{}`",
            FIELD_COUNT,
            fields.len(),
            identifier
        )));
    }

    Ok(Identifier {
        date_created,
        year: parse_number(fields[0], "year", identifier)?,
        month: parse_number(fields[1], "month", identifier)?,
        day: parse_number(fields[2], "day", identifier)?,
        source_language: fields[3].to_string(),
        site_identifier: fields[4].to_string(),
        publisher_name: fields[5].to_string(),
        post_type: fields[6].to_string(),
        original_id: fields[7].to_string(),
    })
}

/// Derive a `/`-joined path: every field but the last, then the full
/// identifier as the leaf segment.
pub fn path_from_identifier(identifier: &str) -> String {
    let fields: Vec<&str> = identifier.split(SEPARATOR).collect();
    let dirs = &fields[..fields.len().saturating_sub(1)];
    if dirs.is_empty() {
        return identifier.to_string();
    }
    format!("{}/{}", dirs.join("/"), identifier)
}

fn is_created_marker(segment: &str) -> bool {
    segment.len() > 1
        && segment.starts_with(CREATED_MARKER)
        && segment[1..].bytes().all(|b| b.is_ascii_digit())
}

fn parse_number<T: std::str::FromStr>(field: &str, name: &str, identifier: &str) -> EngineResult<T> {
    field.parse().map_err(|_| {
        EngineError::Identifier(format!("invalid {} `{}` in `{}`", name, field, identifier))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_date() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 3, 7, 23, 30, 0).unwrap()
    }

    #[test]
    fn test_stringify_layout() {
        let id = stringify(&sample_date(), "en", "Example Times", "example.com", "article", "42").unwrap();
        assert_eq!(id, "2021__03__07__en__example.com__Example Times__article__42");
    }

    #[test]
    fn test_round_trip() {
        let id = stringify(&sample_date(), "de", "pub", "site", "video", "abc-1").unwrap();
        let parsed = parse(&id).unwrap();

        assert_eq!(parsed.year, 2021);
        assert_eq!(parsed.month, 3);
        assert_eq!(parsed.day, 7);
        assert_eq!(parsed.source_language, "de");
        assert_eq!(parsed.site_identifier, "site");
        assert_eq!(parsed.publisher_name, "pub");
        assert_eq!(parsed.post_type, "video");
        assert_eq!(parsed.original_id, "abc-1");
        assert_eq!(parsed.date_created, None);
        assert_eq!(parsed.to_string(), id);
    }

    #[test]
    fn test_created_marker_round_trip() {
        let created = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        let id = Identifier::new(&sample_date(), "en", "pub", "site", "post", "1")
            .unwrap()
            .with_date_created(created);

        let wire = id.to_string();
        assert!(wire.starts_with("t1700000000123__2021__03__07"));

        let parsed: Identifier = wire.parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_utc_calendar_fields() {
        // 23:30 at UTC-5 is already the next day in UTC
        let date = chrono::FixedOffset::west_opt(5 * 3600)
            .unwrap()
            .with_ymd_and_hms(2020, 12, 31, 23, 30, 0)
            .unwrap()
            .with_timezone(&Utc);
        let parsed = parse(&stringify(&date, "en", "p", "s", "t", "1").unwrap()).unwrap();
        assert_eq!((parsed.year, parsed.month, parsed.day), (2021, 1, 1));
    }

    #[test]
    fn test_separator_in_field_rejected() {
        let result = stringify(&sample_date(), "en", "pub", "site", "post", "a__b");
        assert!(matches!(result, Err(EngineError::Identifier(_))));
    }

    #[test]
    fn test_trailing_underscore_rejected() {
        for (publisher, site, post_type) in [("pub", "site_", "post"), ("pub_", "site", "post"), ("pub", "site", "post_")] {
            let result = stringify(&sample_date(), "en", publisher, site, post_type, "42");
            assert!(matches!(result, Err(EngineError::Identifier(_))), "{} {} {}", publisher, site, post_type);
        }
        assert!(stringify(&sample_date(), "en_", "pub", "site", "post", "42").is_err());

        // Leading underscores and a trailing one on the last field survive a round trip
        let id = Identifier::new(&sample_date(), "en", "_pub", "_site", "post", "42_").unwrap();
        assert_eq!(parse(&id.to_string()).unwrap(), id);
    }

    #[test]
    fn test_parse_date() {
        assert_eq!(parse_date("2021-03-07").unwrap(), Utc.with_ymd_and_hms(2021, 3, 7, 0, 0, 0).unwrap());
        assert_eq!(parse_date("2021-03-07T23:30:00Z").unwrap(), sample_date());
        assert_eq!(
            parse_date("2021-03-07T20:00:00-05:00").unwrap(),
            Utc.with_ymd_and_hms(2021, 3, 8, 1, 0, 0).unwrap()
        );
        assert!(matches!(parse_date("March 7"), Err(EngineError::Identifier(_))));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(parse("2021__03__07").is_err());
        assert!(parse("yyyy__03__07__en__s__p__t__1").is_err());
        assert!(parse("").is_err());
    }

    #[test]
    fn test_path_from_identifier() {
        let id = "2021__03__07__en__site__pub__post__42";
        assert_eq!(
            path_from_identifier(id),
            "2021/03/07/en/site/pub/post/2021__03__07__en__site__pub__post__42"
        );
    }

    #[test]
    fn test_identifiers_sort_by_date() {
        let earlier = stringify(&sample_date(), "en", "p", "s", "t", "9").unwrap();
        let later = stringify(&Utc.with_ymd_and_hms(2021, 11, 2, 0, 0, 0).unwrap(), "en", "p", "s", "t", "1").unwrap();
        assert!(earlier < later);
    }
}
