//! Moment-style timestamp formats (`YYYY-MM-DD HH:mm:ss Z`) rendered with chrono.

use chrono::{DateTime, TimeZone};
use std::fmt::Display;

/// Token table, longest token first for each letter.
const TOKENS: &[(&str, &str)] = &[
    ("YYYY", "%Y"),
    ("YY", "%y"),
    ("MMMM", "%B"),
    ("MMM", "%b"),
    ("MM", "%m"),
    ("M", "%-m"),
    ("DD", "%d"),
    ("D", "%-d"),
    ("dddd", "%A"),
    ("ddd", "%a"),
    ("HH", "%H"),
    ("H", "%-H"),
    ("hh", "%I"),
    ("h", "%-I"),
    ("mm", "%M"),
    ("m", "%-M"),
    ("ss", "%S"),
    ("s", "%-S"),
    ("SSS", "%3f"),
    ("A", "%p"),
    ("a", "%P"),
    ("ZZ", "%z"),
    ("Z", "%:z"),
    ("X", "%s"),
];

/// A log timestamp format translated once at load time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogDateFormat {
    source: String,
    pattern: String,
}

impl LogDateFormat {
    pub fn parse(source: &str) -> Self {
        let mut pattern = String::with_capacity(source.len() * 2);
        let mut rest = source;

        while let Some(c) = rest.chars().next() {
            // [text] is emitted verbatim
            if c == '[' {
                if let Some(end) = rest.find(']') {
                    push_literal(&mut pattern, &rest[1..end]);
                    rest = &rest[end + 1..];
                    continue;
                }
            }

            if let Some((token, replacement)) = TOKENS.iter().find(|(token, _)| rest.starts_with(token)) {
                pattern.push_str(replacement);
                rest = &rest[token.len()..];
                continue;
            }

            push_literal(&mut pattern, &rest[..c.len_utf8()]);
            rest = &rest[c.len_utf8()..];
        }

        Self {
            source: source.to_string(),
            pattern,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// The chrono `strftime` pattern.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn format<Tz>(&self, time: &DateTime<Tz>) -> String
    where
        Tz: TimeZone,
        Tz::Offset: Display,
    {
        time.format(&self.pattern).to_string()
    }
}

fn push_literal(pattern: &mut String, literal: &str) {
    for c in literal.chars() {
        if c == '%' {
            pattern.push_str("%%");
        } else {
            pattern.push(c);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    fn sample() -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339("2024-03-07T09:05:03.042+02:00").unwrap()
    }

    #[test]
    fn test_default_pm_format() {
        let format = LogDateFormat::parse("YYYY-MM-DD HH:mm:ss Z");
        assert_eq!(format.pattern(), "%Y-%m-%d %H:%M:%S %:z");
        assert_eq!(format.format(&sample()), "2024-03-07 09:05:03 +02:00");
    }

    #[test]
    fn test_unpadded_and_twelve_hour_tokens() {
        let format = LogDateFormat::parse("D/M/YY h:mm A");
        assert_eq!(format.format(&sample()), "7/3/24 9:05 AM");
    }

    #[test]
    fn test_milliseconds_and_compact_offset() {
        let format = LogDateFormat::parse("HH:mm:ss.SSS ZZ");
        assert_eq!(format.format(&sample()), "09:05:03.042 +0200");
    }

    #[test]
    fn test_escaped_literals() {
        let format = LogDateFormat::parse("[Day] DD [at] HH");
        assert_eq!(format.format(&sample()), "Day 07 at 09");

        let format = LogDateFormat::parse("YYYY 100%");
        assert_eq!(format.format(&sample()), "2024 100%");
    }

    #[test]
    fn test_names() {
        let format = LogDateFormat::parse("ddd, MMM DD");
        assert_eq!(format.format(&sample()), "Thu, Mar 07");
        assert_eq!(format.source(), "ddd, MMM DD");
    }
}
