//! Protobuf-JSON mapping for the well-known types used by the schema.
//!
//! `prost_types` has no serde support, so the message fields that hold a
//! `Struct`, `Duration`, `bytes` map or enum route through these helpers via
//! `#[serde(with = ...)]`.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::marker::PhantomData;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use prost_types::value::Kind;
use prost_types::{ListValue, Struct, Value};
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer, ser};
use serde_json::{Map, Number};
use thiserror::Error;

/// Largest integer an `f64` holds exactly.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;

pub(crate) fn is_zero(value: &i32) -> bool {
    *value == 0
}

/// Convert a JSON object into a protobuf `Struct`.
pub fn to_struct(map: Map<String, serde_json::Value>) -> Struct {
    Struct {
        fields: map
            .into_iter()
            .map(|(key, value)| (key, to_value(value)))
            .collect(),
    }
}

/// A `Struct` number that has no JSON representation.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
#[error("number {0} has no JSON representation")]
pub struct NonFiniteNumber(pub f64);

/// Convert a protobuf `Struct` into a JSON object.
///
/// Fails on NaN or infinite numbers, which JSON cannot carry.
pub fn from_struct(
    value: &Struct,
) -> Result<Map<String, serde_json::Value>, NonFiniteNumber> {
    value
        .fields
        .iter()
        .map(|(key, value)| Ok((key.clone(), from_value(value)?)))
        .collect()
}

fn to_value(value: serde_json::Value) -> Value {
    let kind = match value {
        serde_json::Value::Null => Kind::NullValue(prost_types::NullValue::NullValue as i32),
        serde_json::Value::Bool(b) => Kind::BoolValue(b),
        serde_json::Value::Number(n) => Kind::NumberValue(n.as_f64().unwrap_or_default()),
        serde_json::Value::String(s) => Kind::StringValue(s),
        serde_json::Value::Array(items) => Kind::ListValue(ListValue {
            values: items.into_iter().map(to_value).collect(),
        }),
        serde_json::Value::Object(map) => Kind::StructValue(to_struct(map)),
    };
    Value { kind: Some(kind) }
}

fn from_value(value: &Value) -> Result<serde_json::Value, NonFiniteNumber> {
    Ok(match &value.kind {
        None | Some(Kind::NullValue(_)) => serde_json::Value::Null,
        Some(Kind::BoolValue(b)) => serde_json::Value::Bool(*b),
        Some(Kind::NumberValue(n)) => from_number(*n)?,
        Some(Kind::StringValue(s)) => serde_json::Value::String(s.clone()),
        Some(Kind::ListValue(list)) => serde_json::Value::Array(
            list.values.iter().map(from_value).collect::<Result<_, _>>()?,
        ),
        Some(Kind::StructValue(s)) => serde_json::Value::Object(from_struct(s)?),
    })
}

// Whole numbers go out as integers so `replicas: 3` does not come back as 3.0.
fn from_number(n: f64) -> Result<serde_json::Value, NonFiniteNumber> {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < MAX_SAFE_INTEGER {
        return Ok(serde_json::Value::from(n as i64));
    }
    Number::from_f64(n)
        .map(serde_json::Value::Number)
        .ok_or(NonFiniteNumber(n))
}

/// Deserialize `null` as the field's default, as protobuf-JSON does for
/// scalars, repeated fields and maps.
pub(crate) fn null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// `Option<Struct>` as a plain JSON object.
pub(crate) mod structs {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Option<Struct>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(s) => from_struct(s)
                .map_err(<S::Error as ser::Error>::custom)?
                .serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Struct>, D::Error> {
        let map = Option::<Map<String, serde_json::Value>>::deserialize(deserializer)?;
        Ok(map.map(to_struct))
    }
}

/// `map<string, bytes>` with base64 values.
pub(crate) mod bytes_map {
    use super::*;

    pub fn serialize<S: Serializer>(
        value: &HashMap<String, Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let encoded: BTreeMap<&str, String> = value
            .iter()
            .map(|(key, bytes)| (key.as_str(), BASE64.encode(bytes)))
            .collect();
        encoded.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<HashMap<String, Vec<u8>>, D::Error> {
        let encoded = Option::<HashMap<String, String>>::deserialize(deserializer)?.unwrap_or_default();
        encoded
            .into_iter()
            .map(|(key, value)| {
                BASE64
                    .decode(value.as_bytes())
                    .map(|bytes| (key.clone(), bytes))
                    .map_err(|e| de::Error::custom(format!("invalid base64 for {key:?}: {e}")))
            })
            .collect()
    }
}

/// `Option<Duration>` as `"<seconds>[.<fraction>]s"`.
pub(crate) mod duration {
    use super::*;
    use prost_types::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_str(&format_duration(d)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(text) => parse_duration(&text).map(Some).map_err(de::Error::custom),
            None => Ok(None),
        }
    }
}

pub(crate) fn format_duration(d: &prost_types::Duration) -> String {
    let negative = d.seconds < 0 || d.nanos < 0;
    let seconds = d.seconds.unsigned_abs();
    let nanos = d.nanos.unsigned_abs();
    let sign = if negative { "-" } else { "" };
    if nanos == 0 {
        return format!("{sign}{seconds}s");
    }
    let fraction = format!("{nanos:09}");
    format!("{sign}{seconds}.{}s", fraction.trim_end_matches('0'))
}

pub(crate) fn parse_duration(text: &str) -> Result<prost_types::Duration, String> {
    let body = text
        .strip_suffix('s')
        .ok_or_else(|| format!("duration {text:?} must end in 's'"))?;
    let (negative, body) = match body.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, body),
    };
    let (whole, fraction) = body.split_once('.').unwrap_or((body, ""));
    if whole.is_empty() || fraction.len() > 9 {
        return Err(format!("invalid duration {text:?}"));
    }
    let seconds: i64 = whole
        .parse()
        .map_err(|_| format!("invalid duration {text:?}"))?;
    let nanos: i32 = if fraction.is_empty() {
        0
    } else {
        format!("{fraction:0<9}")
            .parse()
            .map_err(|_| format!("invalid duration {text:?}"))?
    };
    Ok(if negative {
        prost_types::Duration {
            seconds: -seconds,
            nanos: -nanos,
        }
    } else {
        prost_types::Duration { seconds, nanos }
    })
}

/// Name lookup for protobuf enums stored as `i32` fields.
pub trait ProtoEnum {
    fn name_of(value: i32) -> Option<&'static str>;
    fn value_of(name: &str) -> Option<i32>;
}

/// Enums by name, with integers accepted on input.
pub(crate) mod enums {
    use super::*;

    pub fn serialize<E: ProtoEnum, S: Serializer>(value: &i32, serializer: S) -> Result<S::Ok, S::Error> {
        match E::name_of(*value) {
            Some(name) => serializer.serialize_str(name),
            None => serializer.serialize_i32(*value),
        }
    }

    pub fn deserialize<'de, E: ProtoEnum, D: Deserializer<'de>>(deserializer: D) -> Result<i32, D::Error> {
        deserializer.deserialize_any(EnumVisitor::<E>(PhantomData))
    }

    struct EnumVisitor<E>(PhantomData<E>);

    impl<E: ProtoEnum> Visitor<'_> for EnumVisitor<E> {
        type Value = i32;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("an enum name or number")
        }

        fn visit_str<DeErr: de::Error>(self, v: &str) -> Result<i32, DeErr> {
            E::value_of(v).ok_or_else(|| DeErr::custom(format!("unknown enum value {v:?}")))
        }

        fn visit_i64<DeErr: de::Error>(self, v: i64) -> Result<i32, DeErr> {
            i32::try_from(v).map_err(|_| DeErr::custom(format!("enum number {v} out of range")))
        }

        fn visit_u64<DeErr: de::Error>(self, v: u64) -> Result<i32, DeErr> {
            i32::try_from(v).map_err(|_| DeErr::custom(format!("enum number {v} out of range")))
        }

        fn visit_unit<DeErr: de::Error>(self) -> Result<i32, DeErr> {
            Ok(0)
        }

        fn visit_none<DeErr: de::Error>(self) -> Result<i32, DeErr> {
            Ok(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: serde_json::Value) -> Map<String, serde_json::Value> {
        match value {
            serde_json::Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn test_struct_keeps_whole_numbers_integral() {
        let original = object(json!({
            "apiVersion": "example.org/v1",
            "spec": {"replicas": 3, "ratio": 0.5, "tags": ["a", null, true]},
        }));

        let back = from_struct(&to_struct(original.clone())).unwrap();
        assert_eq!(back, original);
        assert_eq!(serde_json::to_string(&back["spec"]["replicas"]).unwrap(), "3");
    }

    #[test]
    fn test_non_finite_numbers_are_rejected() {
        for n in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert!(from_number(n).is_err(), "{n} was accepted");
        }
        assert_eq!(from_number(0.25).unwrap(), json!(0.25));

        let nested = Struct {
            fields: [(
                "spec".to_string(),
                Value {
                    kind: Some(Kind::ListValue(ListValue {
                        values: vec![Value {
                            kind: Some(Kind::NumberValue(f64::INFINITY)),
                        }],
                    })),
                },
            )]
            .into(),
        };
        assert_eq!(from_struct(&nested).unwrap_err(), NonFiniteNumber(f64::INFINITY));
    }

    #[test]
    fn test_format_duration() {
        let d = |seconds, nanos| prost_types::Duration { seconds, nanos };
        assert_eq!(format_duration(&d(60, 0)), "60s");
        assert_eq!(format_duration(&d(1, 500_000_000)), "1.5s");
        assert_eq!(format_duration(&d(0, 1)), "0.000000001s");
        assert_eq!(format_duration(&d(-3, -250_000_000)), "-3.25s");
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("60s").unwrap().seconds, 60);
        let d = parse_duration("1.5s").unwrap();
        assert_eq!((d.seconds, d.nanos), (1, 500_000_000));
        let d = parse_duration("-3.25s").unwrap();
        assert_eq!((d.seconds, d.nanos), (-3, -250_000_000));
        assert!(parse_duration("60").is_err());
        assert!(parse_duration("s").is_err());
        assert!(parse_duration("1.0000000001s").is_err());
    }
}
