//! ==============================================================================
//! normalize.rs - raw payload -> canonical reading / series
//! ==============================================================================
//!
//! purpose:
//!     turns the loosely-shaped JSON the backend sends into the canonical
//!     `SensorReading` and `SensorSeries` shapes. pure functions, no io.
//!
//! numeric policy:
//!     values must parse as a finite f64 (nan and infinities are rejected)
//!     and are printed with exactly two decimals. rounding works on the
//!     decimal text, half away from zero: "1.005" -> "1.01", "-0.125" -> "-0.13".
//!
//! partial failure:
//!     - a reading is all or nothing: one bad field rejects it.
//!     - a series drops bad points and keeps the rest.
//!
//! ==============================================================================

use crate::domain::{SensorReading, SensorSeries, SeriesPoint};
use crate::error::NormalizationError;
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::Value;
use std::str::FromStr;
use tracing::debug;

const DEFAULT_ICON: &str = "DEFAULT";

/// Format a numeric string with exactly two decimal places.
pub fn format_fixed2(raw: &str) -> Result<String, NormalizationError> {
    let trimmed = raw.trim();
    let parsed: f64 = trimmed
        .parse()
        .map_err(|_| NormalizationError::InvalidValue(raw.to_string()))?;
    if !parsed.is_finite() {
        return Err(NormalizationError::InvalidValue(raw.to_string()));
    }

    // outside Decimal's range the f64 is all we have
    let Some(exact) = Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .ok()
    else {
        return Ok(format!("{:.2}", parsed));
    };

    let rounded = exact.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    // -0.001 rounds to a negative zero, which would print as "-0.00"
    let rounded = if rounded.is_zero() { Decimal::ZERO } else { rounded };

    Ok(format!("{:.2}", rounded))
}

/// Icon classification: explicit icon, else the uppercased id, else "DEFAULT".
pub fn resolve_icon(icon: Option<&str>, id: Option<&str>) -> String {
    let non_empty = |s: &&str| !s.trim().is_empty();

    if let Some(icon) = icon.filter(non_empty) {
        return icon.to_string();
    }
    if let Some(id) = id.filter(non_empty) {
        return id.to_uppercase();
    }
    DEFAULT_ICON.to_string()
}

/// ReadingNormalizer: `{id, name, value, icon?, dt}` -> [`SensorReading`].
pub fn normalize_reading(raw: &Value) -> Result<SensorReading, NormalizationError> {
    let id = required_text(raw, "id")?;
    let name = required_text(raw, "name")?;

    let value = match raw.get("value") {
        None | Some(Value::Null) => return Err(NormalizationError::MissingField("value")),
        Some(v) => {
            let text = scalar_text(v)
                .ok_or_else(|| NormalizationError::InvalidValue(v.to_string()))?;
            format_fixed2(&text)?
        }
    };

    let dt = raw
        .get("dt")
        .filter(|v| !v.is_null())
        .ok_or(NormalizationError::MissingField("dt"))?;
    let timestamp =
        parse_timestamp(dt).ok_or_else(|| NormalizationError::InvalidTimestamp(dt.to_string()))?;

    let icon = optional_text(raw, "icon");
    let icon = resolve_icon(icon.as_deref(), Some(&id));

    Ok(SensorReading {
        id,
        name,
        value,
        icon,
        timestamp,
    })
}

/// LogNormalizer: `{id, name, data: [{value, updatedAt}]}` -> [`SensorSeries`].
///
/// Points whose value or timestamp does not parse are dropped; arrival
/// order is kept.
pub fn normalize_series(raw: &Value) -> Result<SensorSeries, NormalizationError> {
    let id = required_text(raw, "id")?;
    let name = required_text(raw, "name")?;
    let data = raw
        .get("data")
        .and_then(Value::as_array)
        .ok_or(NormalizationError::MissingField("data"))?;

    let mut points = Vec::with_capacity(data.len());
    for (index, entry) in data.iter().enumerate() {
        match normalize_point(entry) {
            Ok(point) => points.push(point),
            Err(e) => debug!(series = %name, index, "dropping log point: {}", e),
        }
    }

    if points.len() < data.len() {
        debug!(
            series = %name,
            kept = points.len(),
            total = data.len(),
            "series normalized with dropped points"
        );
    }

    Ok(SensorSeries { id, name, points })
}

fn normalize_point(entry: &Value) -> Result<SeriesPoint, NormalizationError> {
    let raw_value = entry
        .get("value")
        .filter(|v| !v.is_null())
        .ok_or(NormalizationError::MissingField("value"))?;
    let text = scalar_text(raw_value)
        .ok_or_else(|| NormalizationError::InvalidValue(raw_value.to_string()))?;
    let value = format_fixed2(&text)?;

    let updated = entry
        .get("updatedAt")
        .filter(|v| !v.is_null())
        .ok_or(NormalizationError::MissingField("updatedAt"))?;
    let updated_at = parse_timestamp(updated)
        .ok_or_else(|| NormalizationError::InvalidTimestamp(updated.to_string()))?;

    Ok(SeriesPoint { value, updated_at })
}

/// strings pass through, numbers are printed; anything else is not text
fn scalar_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn required_text(raw: &Value, field: &'static str) -> Result<String, NormalizationError> {
    raw.get(field)
        .and_then(scalar_text)
        .ok_or(NormalizationError::MissingField(field))
}

fn optional_text(raw: &Value, field: &str) -> Option<String> {
    raw.get(field).and_then(scalar_text)
}

/// RFC 3339 string or integer unix milliseconds
fn parse_timestamp(v: &Value) -> Option<DateTime<Utc>> {
    match v {
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n.as_i64().and_then(DateTime::<Utc>::from_timestamp_millis),
        _ => None,
    }
}
