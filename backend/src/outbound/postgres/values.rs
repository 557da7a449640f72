//! Conversions between driver values and JSON cells.

use std::error::Error as StdError;
use std::fmt::Write as _;

use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use postgres::Row;
use postgres::types::{FromSql, IsNull, Kind, ToSql, Type};
use serde::Serialize;
use serde_json::{Number, Value};
use uuid::Uuid;

use crate::domain::ports::SqlValue;

type BoxError = Box<dyn StdError + Sync + Send>;

/// A bind value adapting itself to the parameter type the server inferred.
#[derive(Debug)]
pub struct BindValue<'a>(pub &'a SqlValue);

fn is_integer(ty: &Type) -> bool {
    matches!(*ty, Type::INT2 | Type::INT4 | Type::INT8)
}

fn integer_to_sql(value: i64, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    match *ty {
        Type::INT2 => i16::try_from(value)?.to_sql(ty, out),
        Type::INT4 => i32::try_from(value)?.to_sql(ty, out),
        _ => value.to_sql(ty, out),
    }
}

impl ToSql for BindValue<'_> {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        match self.0 {
            SqlValue::Null => Ok(IsNull::Yes),
            SqlValue::Text(text) if is_integer(ty) => integer_to_sql(text.trim().parse()?, ty, out),
            SqlValue::Text(text) if *ty == Type::BOOL => text.trim().parse::<bool>()?.to_sql(ty, out),
            SqlValue::Text(text) => text.to_sql(ty, out),
            SqlValue::Integer(value) => integer_to_sql(*value, ty, out),
            SqlValue::Float(value) if *ty == Type::FLOAT4 => {
                #[expect(
                    clippy::cast_possible_truncation,
                    reason = "the column is single precision"
                )]
                let narrowed = *value as f32;
                narrowed.to_sql(ty, out)
            }
            SqlValue::Float(value) => value.to_sql(ty, out),
            SqlValue::Bool(value) => value.to_sql(ty, out),
            SqlValue::TextArray(values) if matches!(ty.kind(), Kind::Array(_)) => {
                values.to_sql(ty, out)
            }
            SqlValue::TextArray(_) => Err(format!("cannot bind a text array as {ty}").into()),
        }
    }

    fn accepts(_: &Type) -> bool {
        true
    }

    fn to_sql_checked(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        self.to_sql(ty, out)
    }
}

/// Any value read as text; binary text-like formats are plain UTF-8.
struct RawText(String);

impl<'a> FromSql<'a> for RawText {
    fn from_sql(_: &Type, raw: &'a [u8]) -> Result<Self, BoxError> {
        Ok(Self(String::from_utf8_lossy(raw).into_owned()))
    }

    fn accepts(_: &Type) -> bool {
        true
    }
}

/// A `NUMERIC` in its decimal text form.
struct PgNumeric(String);

impl<'a> FromSql<'a> for PgNumeric {
    fn from_sql(_: &Type, raw: &'a [u8]) -> Result<Self, BoxError> {
        decode_numeric(raw).map(Self)
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

const NUMERIC_NEGATIVE: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_POS_INF: u16 = 0xD000;
const NUMERIC_NEG_INF: u16 = 0xF000;

/// Decode the binary `NUMERIC` wire format into decimal text.
///
/// Layout: digit count, weight, sign, display scale, then base-10000
/// digit groups, all big-endian 16-bit.
fn decode_numeric(raw: &[u8]) -> Result<String, BoxError> {
    let [n0, n1, w0, w1, s0, s1, d0, d1, groups @ ..] = raw else {
        return Err("numeric value is truncated".into());
    };
    let count = usize::from(u16::from_be_bytes([*n0, *n1]));
    let weight = i32::from(i16::from_be_bytes([*w0, *w1]));
    let sign = u16::from_be_bytes([*s0, *s1]);
    let scale = usize::from(u16::from_be_bytes([*d0, *d1]));
    let digits: Vec<u16> = groups
        .chunks_exact(2)
        .filter_map(|pair| match pair {
            [hi, lo] => Some(u16::from_be_bytes([*hi, *lo])),
            _ => None,
        })
        .collect();
    if digits.len() != count {
        return Err("numeric digit count does not match its payload".into());
    }
    match sign {
        NUMERIC_NAN => return Ok("NaN".to_owned()),
        NUMERIC_POS_INF => return Ok("Infinity".to_owned()),
        NUMERIC_NEG_INF => return Ok("-Infinity".to_owned()),
        _ => {}
    }
    let group = |index: i32| {
        usize::try_from(index)
            .ok()
            .and_then(|index| digits.get(index).copied())
            .unwrap_or(0)
    };

    let mut text = String::new();
    if sign == NUMERIC_NEGATIVE {
        text.push('-');
    }
    if weight < 0 {
        text.push('0');
    } else {
        for index in 0..=weight {
            if index == 0 {
                write!(text, "{}", group(index))?;
            } else {
                write!(text, "{:04}", group(index))?;
            }
        }
    }
    if scale > 0 {
        let mut fraction = String::new();
        let mut index = weight + 1;
        while fraction.len() < scale {
            write!(fraction, "{:04}", group(index))?;
            index += 1;
        }
        fraction.truncate(scale);
        text.push('.');
        text.push_str(&fraction);
    }
    Ok(text)
}

fn numeric_json(text: String) -> Value {
    text.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map_or(Value::String(text), Value::Number)
}

fn json_of<T: Serialize>(value: Option<T>) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

fn text_of<T: ToString>(value: Option<T>) -> Value {
    value.map_or(Value::Null, |value| Value::String(value.to_string()))
}

fn cell(row: &Row, index: usize, ty: &Type) -> Result<Value, postgres::Error> {
    let value = match *ty {
        Type::BOOL => json_of(row.try_get::<_, Option<bool>>(index)?),
        Type::INT2 => json_of(row.try_get::<_, Option<i16>>(index)?),
        Type::INT4 => json_of(row.try_get::<_, Option<i32>>(index)?),
        Type::INT8 => json_of(row.try_get::<_, Option<i64>>(index)?),
        Type::OID => json_of(row.try_get::<_, Option<u32>>(index)?),
        Type::FLOAT4 => json_of(row.try_get::<_, Option<f32>>(index)?),
        Type::FLOAT8 => json_of(row.try_get::<_, Option<f64>>(index)?),
        Type::NUMERIC => row
            .try_get::<_, Option<PgNumeric>>(index)?
            .map_or(Value::Null, |numeric| numeric_json(numeric.0)),
        Type::JSON | Type::JSONB => row
            .try_get::<_, Option<Value>>(index)?
            .unwrap_or(Value::Null),
        Type::TIMESTAMP => row
            .try_get::<_, Option<NaiveDateTime>>(index)?
            .map_or(Value::Null, |at| {
                Value::String(at.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
            }),
        Type::TIMESTAMPTZ => row
            .try_get::<_, Option<DateTime<Utc>>>(index)?
            .map_or(Value::Null, |at| Value::String(at.to_rfc3339())),
        Type::DATE => text_of(row.try_get::<_, Option<NaiveDate>>(index)?),
        Type::TIME => text_of(row.try_get::<_, Option<NaiveTime>>(index)?),
        Type::UUID => text_of(row.try_get::<_, Option<Uuid>>(index)?),
        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY | Type::NAME_ARRAY => {
            json_of(row.try_get::<_, Option<Vec<Option<String>>>>(index)?)
        }
        Type::INT4_ARRAY => json_of(row.try_get::<_, Option<Vec<Option<i32>>>>(index)?),
        Type::INT8_ARRAY => json_of(row.try_get::<_, Option<Vec<Option<i64>>>>(index)?),
        _ => row
            .try_get::<_, Option<RawText>>(index)?
            .map_or(Value::Null, |raw| Value::String(raw.0)),
    };
    Ok(value)
}

/// One row as JSON cells in column order.
pub fn row_to_json(row: &Row) -> Result<Vec<Value>, postgres::Error> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(index, column)| cell(row, index, column.type_()))
        .collect()
}
