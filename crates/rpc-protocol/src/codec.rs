//! Tagged-JSON codec (C1): a lossless encoding for values plain JSON cannot
//! carry directly (dates, ordered sets, ordered mappings, big integers,
//! undefined, byte strings), layered on top of `serde_json`.
//!
//! The wire shape is a plain JSON tree (`json`) plus a side-table (`meta`)
//! mapping dotted paths to the tag that must be applied when decoding that
//! node back into a [`RichValue`]. This mirrors the "parallel structures"
//! design sketched in the spec: a plain document plus type hints, rather
//! than inline markers scattered through the tree.

use std::collections::BTreeMap;
use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};

use crate::error::CodecError;

/// A value that may contain types ordinary JSON cannot represent.
///
/// This is the canonical in-memory shape for both `encode` and `decode`:
/// `decode(encode(v))` reconstructs the original `RichValue` under
/// structural equality, including nested compositions.
#[derive(Debug, Clone, PartialEq)]
pub enum RichValue {
    Null,
    Undefined,
    Bool(bool),
    Number(f64),
    String(String),
    BigInt(BigInt),
    DateTime(chrono::DateTime<chrono::Utc>),
    Bytes(Vec<u8>),
    Array(Vec<RichValue>),
    /// Insertion-ordered, deduplicated-on-push set of values.
    Set(Vec<RichValue>),
    /// Insertion-ordered string-keyed mapping, distinct from a plain
    /// [`RichValue::Object`] so a receiver can reconstruct a `Map` rather
    /// than a bare object.
    Map(Vec<(String, RichValue)>),
    /// A plain JSON object with no special decode behaviour.
    Object(Vec<(String, RichValue)>),
}

impl RichValue {
    pub fn set(values: impl IntoIterator<Item = RichValue>) -> Self {
        let mut out: Vec<RichValue> = Vec::new();
        for v in values {
            if !out.contains(&v) {
                out.push(v);
            }
        }
        RichValue::Set(out)
    }

    pub fn object(fields: impl IntoIterator<Item = (String, RichValue)>) -> Self {
        RichValue::Object(fields.into_iter().collect())
    }

    /// Lifts a plain [`serde_json::Value`] into a `RichValue` with no tags
    /// applied. Used on the client side to turn ordinary `Serialize` output
    /// into something [`encode`] can carry per-field; values that need a
    /// tag (dates, bigints, bytes, sets, maps) must be built directly with
    /// the matching `RichValue` variant instead of going through this path.
    pub fn from_json(value: serde_json::Value) -> Self {
        use serde_json::Value as J;
        match value {
            J::Null => RichValue::Null,
            J::Bool(b) => RichValue::Bool(b),
            J::Number(n) => RichValue::Number(n.as_f64().unwrap_or(0.0)),
            J::String(s) => RichValue::String(s),
            J::Array(items) => RichValue::Array(items.into_iter().map(RichValue::from_json).collect()),
            J::Object(map) => {
                RichValue::Object(map.into_iter().map(|(k, v)| (k, RichValue::from_json(v))).collect())
            }
        }
    }

    /// Materializes `self` into a plain [`serde_json::Value`] suitable for
    /// `serde`-deserializing into a concrete Rust type. Tagged nodes are
    /// flattened into their canonical JSON shape (e.g. `DateTime` becomes
    /// an RFC 3339 string, which `chrono`'s own `Deserialize` accepts), and
    /// [`RichValue::Undefined`] fields are *omitted* from their enclosing
    /// object so they behave like a missing struct field.
    pub fn into_schema_json(self) -> serde_json::Value {
        use serde_json::Value as J;
        match self {
            RichValue::Null | RichValue::Undefined => J::Null,
            RichValue::Bool(b) => J::Bool(b),
            RichValue::Number(n) => serde_json::Number::from_f64(n).map_or(J::Null, J::Number),
            RichValue::String(s) => J::String(s),
            RichValue::BigInt(b) => J::String(b.0),
            RichValue::DateTime(dt) => J::String(dt.to_rfc3339()),
            RichValue::Bytes(bytes) => J::String(base64_encode(&bytes)),
            RichValue::Array(items) | RichValue::Set(items) => {
                J::Array(items.into_iter().map(RichValue::into_schema_json).collect())
            }
            RichValue::Map(entries) | RichValue::Object(entries) => {
                let mut map = serde_json::Map::new();
                for (k, v) in entries {
                    if matches!(v, RichValue::Undefined) {
                        continue;
                    }
                    map.insert(k, v.into_schema_json());
                }
                J::Object(map)
            }
        }
    }
}

/// An arbitrary-precision integer, represented as its canonical decimal
/// text so large values survive the JSON round trip without precision
/// loss. Validated on construction; `Display`/`FromStr` round-trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BigInt(String);

impl BigInt {
    pub fn new(digits: impl Into<String>) -> Result<Self, CodecError> {
        let s = digits.into();
        let body = s.strip_prefix('-').unwrap_or(&s);
        if body.is_empty() || !body.bytes().all(|b| b.is_ascii_digit()) {
            return Err(CodecError::BadEncoding(format!("invalid bigint: {s}")));
        }
        if body.len() > 1 && body.starts_with('0') {
            return Err(CodecError::BadEncoding(format!(
                "bigint has leading zero: {s}"
            )));
        }
        Ok(BigInt(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<i64> for BigInt {
    fn from(n: i64) -> Self {
        BigInt(n.to_string())
    }
}

impl fmt::Display for BigInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Tag {
    Undefined,
    Bigint,
    Date,
    Bytes,
    Set,
    Map,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Meta {
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    values: BTreeMap<String, Tag>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    json: serde_json::Value,
    #[serde(default)]
    meta: Meta,
}

const ROOT_PATH: &str = "";

fn join_path(path: &str, segment: impl fmt::Display) -> String {
    if path.is_empty() {
        segment.to_string()
    } else {
        format!("{path}.{segment}")
    }
}

/// Encodes a [`RichValue`] as tagged JSON text. Encoding is stable: equal
/// `RichValue`s produce byte-identical output.
pub fn encode(value: &RichValue) -> String {
    let mut meta = BTreeMap::new();
    let json = plainify(value, ROOT_PATH, &mut meta);
    let envelope = Envelope {
        json,
        meta: Meta { values: meta },
    };
    // `Envelope` only contains types serde_json always succeeds on.
    serde_json::to_string(&envelope).expect("tagged envelope always serializes")
}

fn plainify(value: &RichValue, path: &str, meta: &mut BTreeMap<String, Tag>) -> serde_json::Value {
    use serde_json::Value as J;
    match value {
        RichValue::Null => J::Null,
        RichValue::Undefined => {
            meta.insert(path.to_owned(), Tag::Undefined);
            J::Null
        }
        RichValue::Bool(b) => J::Bool(*b),
        RichValue::Number(n) => serde_json::Number::from_f64(*n).map_or(J::Null, J::Number),
        RichValue::String(s) => J::String(s.clone()),
        RichValue::BigInt(b) => {
            meta.insert(path.to_owned(), Tag::Bigint);
            J::String(b.0.clone())
        }
        RichValue::DateTime(dt) => {
            meta.insert(path.to_owned(), Tag::Date);
            J::String(dt.to_rfc3339())
        }
        RichValue::Bytes(bytes) => {
            meta.insert(path.to_owned(), Tag::Bytes);
            J::String(base64_encode(bytes))
        }
        RichValue::Array(items) => J::Array(
            items
                .iter()
                .enumerate()
                .map(|(i, v)| plainify(v, &join_path(path, i), meta))
                .collect(),
        ),
        RichValue::Set(items) => {
            meta.insert(path.to_owned(), Tag::Set);
            J::Array(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, v)| plainify(v, &join_path(path, i), meta))
                    .collect(),
            )
        }
        RichValue::Map(entries) => {
            meta.insert(path.to_owned(), Tag::Map);
            let mut map = serde_json::Map::new();
            for (k, v) in entries {
                map.insert(k.clone(), plainify(v, &join_path(path, k), meta));
            }
            J::Object(map)
        }
        RichValue::Object(entries) => {
            let mut map = serde_json::Map::new();
            for (k, v) in entries {
                map.insert(k.clone(), plainify(v, &join_path(path, k), meta));
            }
            J::Object(map)
        }
    }
}

/// Decodes tagged JSON text produced by [`encode`]. Malformed input (bad
/// JSON, an unknown tag, or a tag pointing at a shape it cannot apply to)
/// fails with [`CodecError::BadEncoding`].
pub fn decode(text: &str) -> Result<RichValue, CodecError> {
    let envelope: Envelope =
        serde_json::from_str(text).map_err(|e| CodecError::BadEncoding(e.to_string()))?;
    richify(envelope.json, ROOT_PATH, &envelope.meta.values)
}

fn richify(
    value: serde_json::Value,
    path: &str,
    tags: &BTreeMap<String, Tag>,
) -> Result<RichValue, CodecError> {
    use serde_json::Value as J;
    if let Some(tag) = tags.get(path) {
        return richify_tagged(*tag, value, path, tags);
    }
    Ok(match value {
        J::Null => RichValue::Null,
        J::Bool(b) => RichValue::Bool(b),
        J::Number(n) => RichValue::Number(n.as_f64().ok_or_else(|| {
            CodecError::BadEncoding(format!("number out of range at {path}"))
        })?),
        J::String(s) => RichValue::String(s),
        J::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for (i, item) in items.into_iter().enumerate() {
                out.push(richify(item, &join_path(path, i), tags)?);
            }
            RichValue::Array(out)
        }
        J::Object(map) => {
            let mut out = Vec::with_capacity(map.len());
            for (k, v) in map {
                let child_path = join_path(path, &k);
                out.push((k, richify(v, &child_path, tags)?));
            }
            RichValue::Object(out)
        }
    })
}

fn richify_tagged(
    tag: Tag,
    value: serde_json::Value,
    path: &str,
    tags: &BTreeMap<String, Tag>,
) -> Result<RichValue, CodecError> {
    use serde_json::Value as J;
    Ok(match tag {
        Tag::Undefined => RichValue::Undefined,
        Tag::Bigint => {
            let J::String(s) = value else {
                return Err(CodecError::BadEncoding(format!(
                    "bigint tag at {path} is not a string"
                )));
            };
            RichValue::BigInt(BigInt::new(s)?)
        }
        Tag::Date => {
            let J::String(s) = value else {
                return Err(CodecError::BadEncoding(format!(
                    "date tag at {path} is not a string"
                )));
            };
            let dt = chrono::DateTime::parse_from_rfc3339(&s)
                .map_err(|e| CodecError::BadEncoding(format!("bad date at {path}: {e}")))?;
            RichValue::DateTime(dt.with_timezone(&chrono::Utc))
        }
        Tag::Bytes => {
            let J::String(s) = value else {
                return Err(CodecError::BadEncoding(format!(
                    "bytes tag at {path} is not a string"
                )));
            };
            RichValue::Bytes(base64_decode(&s)?)
        }
        Tag::Set => {
            let J::Array(items) = value else {
                return Err(CodecError::BadEncoding(format!(
                    "set tag at {path} is not an array"
                )));
            };
            let mut out = Vec::with_capacity(items.len());
            for (i, item) in items.into_iter().enumerate() {
                out.push(richify(item, &join_path(path, i), tags)?);
            }
            RichValue::Set(out)
        }
        Tag::Map => {
            let J::Object(map) = value else {
                return Err(CodecError::BadEncoding(format!(
                    "map tag at {path} is not an object"
                )));
            };
            let mut out = Vec::with_capacity(map.len());
            for (k, v) in map {
                let child_path = join_path(path, &k);
                out.push((k, richify(v, &child_path, tags)?));
            }
            RichValue::Map(out)
        }
    })
}

fn base64_encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

fn base64_decode(s: &str) -> Result<Vec<u8>, CodecError> {
    STANDARD
        .decode(s)
        .map_err(|e| CodecError::BadEncoding(format!("bad base64: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> RichValue {
        RichValue::object([
            ("id".to_owned(), RichValue::String("u1".to_owned())),
            (
                "at".to_owned(),
                RichValue::DateTime(chrono::Utc.timestamp_millis_opt(1_704_164_645_000).unwrap()),
            ),
            (
                "tags".to_owned(),
                RichValue::set([
                    RichValue::Number(1.0),
                    RichValue::Number(2.0),
                    RichValue::Number(3.0),
                ]),
            ),
            ("note".to_owned(), RichValue::Undefined),
            ("big".to_owned(), RichValue::BigInt(BigInt::new("123456789012345678901234").unwrap())),
        ])
    }

    #[test]
    fn round_trips_a_composed_value() {
        let original = sample();
        let text = encode(&original);
        let decoded = decode(&text).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn encoding_is_stable_across_calls() {
        let v = sample();
        assert_eq!(encode(&v), encode(&v));
    }

    #[test]
    fn encode_decode_encode_is_byte_identical() {
        let v = sample();
        let once = encode(&v);
        let twice = encode(&decode(&once).unwrap());
        assert_eq!(once, twice);
    }

    #[test]
    fn decode_rejects_malformed_json() {
        assert!(matches!(
            decode("not json"),
            Err(CodecError::BadEncoding(_))
        ));
    }

    #[test]
    fn decode_rejects_bad_bigint_digits() {
        let text = r#"{"json":"12x34","meta":{"values":{"":"bigint"}}}"#;
        assert!(matches!(decode(text), Err(CodecError::BadEncoding(_))));
    }

    #[test]
    fn distinguishes_undefined_from_null() {
        let v = RichValue::object([
            ("a".to_owned(), RichValue::Null),
            ("b".to_owned(), RichValue::Undefined),
        ]);
        let decoded = decode(&encode(&v)).unwrap();
        assert_eq!(decoded, v);
    }

    #[test]
    fn into_schema_json_omits_undefined_fields() {
        let v = RichValue::object([
            ("a".to_owned(), RichValue::Number(1.0)),
            ("b".to_owned(), RichValue::Undefined),
        ]);
        let json = v.into_schema_json();
        let obj = json.as_object().unwrap();
        assert!(obj.contains_key("a"));
        assert!(!obj.contains_key("b"));
    }

    #[test]
    fn into_schema_json_flattens_date_to_rfc3339() {
        let dt = chrono::Utc.timestamp_millis_opt(1_704_164_645_000).unwrap();
        let json = RichValue::DateTime(dt).into_schema_json();
        assert_eq!(json, serde_json::Value::String(dt.to_rfc3339()));
    }

    #[test]
    fn from_json_lifts_a_plain_object_with_no_tags() {
        let json = serde_json::json!({"name": "Ann", "age": 30, "tags": [1, 2]});
        let rich = RichValue::from_json(json.clone());
        assert_eq!(rich.into_schema_json(), json);
    }

    #[test]
    fn base64_round_trips_arbitrary_bytes() {
        for bytes in [vec![], vec![1u8], vec![1, 2], vec![1, 2, 3], vec![0xff; 17]] {
            let encoded = base64_encode(&bytes);
            assert_eq!(base64_decode(&encoded).unwrap(), bytes);
        }
    }
}
