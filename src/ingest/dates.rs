//! Spreadsheet date handling.
//!
//! Workbooks store dates as day serials with a date number format applied.
//! Readers use these helpers to hand the model ISO dates instead of serials.

use chrono::{Duration, NaiveDate, NaiveDateTime, Timelike};
use serde_json::Value;

/// Built-in number format ids that display a date (time-only formats excluded).
fn is_builtin_date_format(id: u16) -> bool {
    matches!(id, 14..=17 | 22 | 27..=31 | 36 | 50..=58)
}

/// True when a number format (built-in id or custom format code) renders a date.
///
/// A custom code counts as a date when it has a day or year token outside of
/// quoted literals and bracketed sections (colors, locales, elapsed time).
pub fn is_date_format(id: u16, code: Option<&str>) -> bool {
    if is_builtin_date_format(id) {
        return true;
    }
    let Some(code) = code else {
        return false;
    };

    let mut in_quotes = false;
    let mut in_brackets = false;
    let mut escaped = false;
    for c in code.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '"' => in_quotes = !in_quotes,
            '[' if !in_quotes => in_brackets = true,
            ']' if !in_quotes => in_brackets = false,
            'd' | 'D' | 'y' | 'Y' if !in_quotes && !in_brackets => return true,
            _ => {}
        }
    }
    false
}

/// Convert a day serial into a date value.
///
/// Whole days become `YYYY-MM-DD`; serials with a time part become
/// `YYYY-MM-DD HH:MM:SS`. Out-of-range serials are returned as plain numbers.
pub fn serial_to_value(serial: f64, date_1904: bool) -> Value {
    match serial_to_datetime(serial, date_1904) {
        Some(dt) if dt.time().num_seconds_from_midnight() == 0 => {
            Value::String(dt.format("%Y-%m-%d").to_string())
        }
        Some(dt) => Value::String(dt.format("%Y-%m-%d %H:%M:%S").to_string()),
        None => number_value(serial),
    }
}

fn serial_to_datetime(serial: f64, date_1904: bool) -> Option<NaiveDateTime> {
    if !serial.is_finite() || serial < 0.0 || serial > 2_958_465.0 {
        return None;
    }

    let days = serial.trunc() as i64;
    let seconds = ((serial - serial.trunc()) * 86_400.0).round() as i64;

    let epoch = if date_1904 {
        NaiveDate::from_ymd_opt(1904, 1, 1)?
    } else if days < 60 {
        // Serials before the phantom 1900-02-29 are offset by one day
        NaiveDate::from_ymd_opt(1899, 12, 31)?
    } else {
        NaiveDate::from_ymd_opt(1899, 12, 30)?
    };

    let date = epoch.checked_add_signed(Duration::days(days))?;
    date.and_hms_opt(0, 0, 0)?
        .checked_add_signed(Duration::seconds(seconds))
}

/// JSON number for a cell value, using an integer when the value is whole.
pub fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}
