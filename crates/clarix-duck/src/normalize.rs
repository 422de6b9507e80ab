//! Store-native values -> portable JSON scalars
//!
//! Dates and times become ISO-8601 text, decimals become floating point,
//! everything else passes through as the closest JSON type.

use chrono::{DateTime, NaiveDate, NaiveTime};
use duckdb::types::{TimeUnit, ValueRef};
use rust_decimal::prelude::ToPrimitive;
use serde_json::Value;

/// Days between 0001-01-01 (CE day 1) and 1970-01-01
const UNIX_EPOCH_FROM_CE: i32 = 719_163;

pub fn normalize(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Boolean(b) => Value::Bool(b),
        ValueRef::TinyInt(i) => Value::from(i),
        ValueRef::SmallInt(i) => Value::from(i),
        ValueRef::Int(i) => Value::from(i),
        ValueRef::BigInt(i) => Value::from(i),
        ValueRef::HugeInt(i) => huge_int(i),
        ValueRef::UTinyInt(i) => Value::from(i),
        ValueRef::USmallInt(i) => Value::from(i),
        ValueRef::UInt(i) => Value::from(i),
        ValueRef::UBigInt(i) => Value::from(i),
        ValueRef::Float(f) => Value::from(f64::from(f)),
        ValueRef::Double(f) => Value::from(f),
        ValueRef::Decimal(d) => d.to_f64().map(Value::from).unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(b) => Value::String(format!("<blob {} bytes>", b.len())),
        ValueRef::Date32(days) => date(days),
        ValueRef::Timestamp(unit, v) => timestamp(unit, v),
        ValueRef::Time64(unit, v) => time(unit, v),
        ValueRef::Interval {
            months,
            days,
            nanos,
        } => Value::String(interval(months, days, nanos)),
        _ => Value::String("<unsupported>".to_string()),
    }
}

fn huge_int(i: i128) -> Value {
    if let Ok(small) = i64::try_from(i) {
        Value::from(small)
    } else if let Ok(unsigned) = u64::try_from(i) {
        Value::from(unsigned)
    } else {
        Value::from(i as f64)
    }
}

fn to_micros(unit: TimeUnit, v: i64) -> Option<i64> {
    match unit {
        TimeUnit::Second => v.checked_mul(1_000_000),
        TimeUnit::Millisecond => v.checked_mul(1_000),
        TimeUnit::Microsecond => Some(v),
        TimeUnit::Nanosecond => Some(v.div_euclid(1_000)),
    }
}

fn date(days: i32) -> Value {
    days.checked_add(UNIX_EPOCH_FROM_CE)
        .and_then(NaiveDate::from_num_days_from_ce_opt)
        .map(|d| Value::String(d.format("%Y-%m-%d").to_string()))
        .unwrap_or(Value::Null)
}

fn timestamp(unit: TimeUnit, v: i64) -> Value {
    to_micros(unit, v)
        .and_then(|micros| {
            let secs = micros.div_euclid(1_000_000);
            let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;
            DateTime::from_timestamp(secs, nanos)
        })
        .map(|dt| Value::String(dt.naive_utc().format("%Y-%m-%dT%H:%M:%S%.f").to_string()))
        .unwrap_or(Value::Null)
}

fn time(unit: TimeUnit, v: i64) -> Value {
    to_micros(unit, v)
        .and_then(|micros| {
            let secs = u32::try_from(micros.div_euclid(1_000_000)).ok()?;
            let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;
            NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos)
        })
        .map(|t| Value::String(t.format("%H:%M:%S%.f").to_string()))
        .unwrap_or(Value::Null)
}

fn interval(months: i32, days: i32, nanos: i64) -> String {
    let sign = if nanos < 0 { "-" } else { "" };
    let abs = nanos.unsigned_abs();
    let whole = abs / 1_000_000_000;
    let frac = abs % 1_000_000_000;
    if frac == 0 {
        format!("P{}M{}DT{}{}S", months, days, sign, whole)
    } else {
        let frac = format!("{:09}", frac);
        format!("P{}M{}DT{}{}.{}S", months, days, sign, whole, frac.trim_end_matches('0'))
    }
}
