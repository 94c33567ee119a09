//! Scalar coercion for filter values.
//!
//! Coercions are tried in table order; the first pattern that accepts the whole
//! string wins, otherwise the value stays a string. New patterns go in the table.

use bson::Bson;
use chrono::{NaiveDate, NaiveDateTime};

type Coercion = fn(&str) -> Option<Bson>;

/// `(name, coercion)` in precedence order.
pub const COERCIONS: &[(&str, Coercion)] =
    &[("boolean", coerce_bool), ("number", coerce_number), ("date", coerce_date)];

/// Coerce one scalar parameter value.
#[must_use]
pub fn coerce(raw: &str) -> Bson {
    COERCIONS
        .iter()
        .find_map(|(_, f)| f(raw))
        .unwrap_or_else(|| Bson::String(raw.to_owned()))
}

fn coerce_bool(raw: &str) -> Option<Bson> {
    match raw {
        "true" => Some(Bson::Boolean(true)),
        "false" => Some(Bson::Boolean(false)),
        _ => None,
    }
}

fn coerce_number(raw: &str) -> Option<Bson> {
    // Rust accepts "inf"/"NaN"; numeric text must start like a number.
    let first = raw.chars().next()?;
    if !(first.is_ascii_digit() || matches!(first, '-' | '+' | '.')) {
        return None;
    }
    if let Ok(i) = raw.parse::<i64>() {
        return Some(i32::try_from(i).map_or(Bson::Int64(i), Bson::Int32));
    }
    raw.parse::<f64>().ok().filter(|f| f.is_finite()).map(Bson::Double)
}

fn coerce_date(raw: &str) -> Option<Bson> {
    // Cheap shape check before handing to chrono: YYYY-MM-DD prefix.
    let b = raw.as_bytes();
    if b.len() < 10 || b[4] != b'-' || b[7] != b'-' {
        return None;
    }
    let millis = if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(raw) {
        dt.timestamp_millis()
    } else if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        dt.and_utc().timestamp_millis()
    } else if let Ok(d) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        d.and_hms_opt(0, 0, 0)?.and_utc().timestamp_millis()
    } else {
        return None;
    };
    Some(Bson::DateTime(bson::DateTime::from_millis(millis)))
}

/// Read an `exists` operand: `false`/`0` mean absent, anything else present.
#[must_use]
pub fn coerce_exists(raw: &str) -> Bson {
    Bson::Boolean(!matches!(raw, "false" | "0"))
}
