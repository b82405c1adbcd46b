//! Shared parsing utilities.
//!
//! Wall-clock timestamp resolution (including localized meridiem markers),
//! the incremental JSON array scanner used by the structured parsers, and
//! small line helpers shared between the TXT parsers.

use std::io::BufRead;

use chrono::{FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike};

use crate::error::{ChatlensError, Result};

/// Date formats accepted by [`parse_date`], in trial order.
const DATE_FORMATS: &[&str] = &[
    "%Y/%m/%d",
    "%Y-%m-%d",
    "%Y.%m.%d",
    "%Y年%m月%d日",
];

/// Time formats accepted by [`parse_time`] after meridiem normalization.
const TIME_FORMATS: &[&str] = &["%H:%M:%S", "%H:%M"];

/// Parses a calendar date, tolerating trailing weekday decorations
/// (`2025/01/02 Friday`, `2025/1/2(月)`).
pub(crate) fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    // Cut at the first character that cannot belong to the date itself.
    let head: String = s
        .chars()
        .take_while(|c| c.is_ascii_digit() || "/-.年月日".contains(*c))
        .collect();
    let head = head.trim_end_matches(['/', '-', '.']);
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(head, format) {
            return Some(date);
        }
    }
    None
}

/// Parses a wall-clock time.
///
/// Localized meridiem markers are normalized first: `上午`/`午前` behave as
/// AM, `下午`/`午後` as PM, in either prefix (`下午1:03`) or suffix position.
/// English `AM`/`PM` suffixes are handled the same way.
pub(crate) fn parse_time(s: &str) -> Option<NaiveTime> {
    let mut s = s.trim().to_string();
    let mut meridiem: Option<bool> = None; // Some(true) = PM

    for (marker, pm) in [
        ("上午", false),
        ("午前", false),
        ("下午", true),
        ("午後", true),
        ("晚上", true),
        ("凌晨", false),
    ] {
        if s.contains(marker) {
            s = s.replace(marker, " ").trim().to_string();
            meridiem = Some(pm);
            break;
        }
    }
    if meridiem.is_none() {
        let upper = s.to_uppercase();
        if let Some(stripped) = upper.strip_suffix("PM") {
            s = stripped.trim().to_string();
            meridiem = Some(true);
        } else if let Some(stripped) = upper.strip_suffix("AM") {
            s = stripped.trim().to_string();
            meridiem = Some(false);
        }
    }

    let time = TIME_FORMATS
        .iter()
        .find_map(|format| NaiveTime::parse_from_str(&s, format).ok())?;

    match meridiem {
        Some(true) if time.hour() < 12 => time.with_hour(time.hour() + 12),
        Some(false) if time.hour() == 12 => time.with_hour(0),
        _ => Some(time),
    }
}

/// Converts a local wall-clock instant into UTC seconds using the corpus
/// timezone offset.
pub(crate) fn to_utc_seconds(date: NaiveDate, time: NaiveTime, tz: FixedOffset) -> i64 {
    let naive = NaiveDateTime::new(date, time);
    match tz.from_local_datetime(&naive).single() {
        Some(dt) => dt.timestamp(),
        // FixedOffset mappings are always unique; keep a safe fallback anyway.
        None => naive.and_utc().timestamp() - i64::from(tz.local_minus_utc()),
    }
}

/// Parses a combined `date time` stamp (`2023-05-01 12:00:00`).
pub(crate) fn parse_stamp(date: &str, time: &str, tz: FixedOffset) -> Option<i64> {
    Some(to_utc_seconds(parse_date(date)?, parse_time(time)?, tz))
}

/// Strips a UTF-8 BOM if present.
pub(crate) fn strip_bom(s: &str) -> &str {
    s.strip_prefix('\u{feff}').unwrap_or(s)
}

/// Returns `true` if the text is a single bare URL (classified as a link
/// message rather than text).
pub(crate) fn is_url_only(text: &str) -> bool {
    let trimmed = text.trim();
    (trimmed.starts_with("http://") || trimmed.starts_with("https://"))
        && !trimmed.contains(char::is_whitespace)
}

/// Incremental scanner over a JSON array of objects.
///
/// Reads the underlying stream line by line, tracking brace depth (string-
/// and escape-aware, since chat content routinely contains braces) and
/// yielding one complete object at a time. Memory is bounded by the largest
/// single object, capped at `max_object_size`.
pub(crate) struct JsonArrayScanner<R: BufRead> {
    reader: R,
    format: &'static str,
    max_object_size: usize,
    bytes_read: u64,
    buffer: String,
    finished: bool,
}

impl<R: BufRead> JsonArrayScanner<R> {
    /// Creates a scanner positioned just after the array's `[`.
    pub(crate) fn new(reader: R, format: &'static str, max_object_size: usize) -> Self {
        Self {
            reader,
            format,
            max_object_size,
            bytes_read: 0,
            buffer: String::new(),
            finished: false,
        }
    }

    /// Total bytes consumed from the underlying reader.
    pub(crate) fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Returns `true` once the closing `]` has been consumed.
    pub(crate) fn finished(&self) -> bool {
        self.finished
    }

    /// Reads the next complete JSON object, or `None` at the array end.
    pub(crate) fn next_object(&mut self) -> Result<Option<String>> {
        if self.finished {
            return Ok(None);
        }

        self.buffer.clear();
        let mut depth: i32 = 0;
        let mut in_string = false;
        let mut escaped = false;
        let mut found_start = false;

        loop {
            let mut line = String::new();
            let bytes = self.reader.read_line(&mut line)?;
            if bytes == 0 {
                self.finished = true;
                if found_start {
                    return Err(ChatlensError::structural(
                        self.format,
                        "unexpected end of file inside a record",
                        None,
                    ));
                }
                return Ok(None);
            }
            self.bytes_read += bytes as u64;

            let trimmed = line.trim();
            if !found_start {
                if trimmed.starts_with(']') {
                    self.finished = true;
                    return Ok(None);
                }
                if trimmed.is_empty() || trimmed == "," || trimmed == "[" {
                    continue;
                }
            }

            for ch in line.chars() {
                if in_string {
                    if escaped {
                        escaped = false;
                    } else if ch == '\\' {
                        escaped = true;
                    } else if ch == '"' {
                        in_string = false;
                    }
                    continue;
                }
                match ch {
                    '"' => in_string = true,
                    '{' => {
                        found_start = true;
                        depth += 1;
                    }
                    '}' => depth -= 1,
                    _ => {}
                }
            }

            if found_start {
                self.buffer.push_str(&line);
                if self.buffer.len() > self.max_object_size {
                    return Err(ChatlensError::structural(
                        self.format,
                        format!(
                            "record exceeds {} bytes; truncated or malformed export",
                            self.max_object_size
                        ),
                        None,
                    ));
                }
                if depth == 0 {
                    let object = self.buffer.trim().trim_end_matches(',').trim();
                    return Ok(Some(object.to_string()));
                }
            }
        }
    }
}
