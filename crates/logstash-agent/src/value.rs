// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Structured values attached to log records.
//!
//! [`LogValue`] is a closed, recursive type: text, anything with a `Display` impl, lists and
//! string-keyed maps. Maps are `BTreeMap`s so that serialization always emits keys in sorted
//! order and two encodings of the same value are byte-identical.
//!
//! Decoding is lossy in one direction only: a [`LogValue::Stringified`] is written as its
//! display text and comes back as [`LogValue::Text`], since the two are indistinguishable on
//! the wire.

use std::collections::BTreeMap;
use std::fmt::{self, Display, Write};
use std::sync::Arc;

use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::ser::{self, SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::constants::{NAN_TOKEN, NEGATIVE_INFINITY_TOKEN, POSITIVE_INFINITY_TOKEN};

/// Metadata of a single record, keyed and serialized in sorted order.
pub type Metadata = BTreeMap<String, LogValue>;

#[derive(Clone)]
pub enum LogValue {
    Text(String),
    /// A value rendered through its `Display` impl at encoding time.
    Stringified(Arc<dyn Display + Send + Sync>),
    List(Vec<LogValue>),
    Map(Metadata),
}

impl LogValue {
    pub fn stringified<T>(value: T) -> Self
    where
        T: Display + Send + Sync + 'static,
    {
        Self::Stringified(Arc::new(value))
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Display text of a scalar value. `None` for lists, maps and failing `Display` impls.
    #[must_use]
    pub fn to_text(&self) -> Option<String> {
        match self {
            Self::Text(text) => Some(text.clone()),
            Self::Stringified(value) => render(&**value).ok(),
            Self::List(_) | Self::Map(_) => None,
        }
    }
}

fn render(value: &dyn Display) -> Result<String, fmt::Error> {
    let mut rendered = String::new();
    write!(rendered, "{value}")?;
    Ok(rendered)
}

impl fmt::Debug for LogValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Self::Stringified(value) => f
                .debug_tuple("Stringified")
                .field(&format_args!("{value}"))
                .finish(),
            Self::List(values) => f.debug_tuple("List").field(values).finish(),
            Self::Map(map) => f.debug_tuple("Map").field(map).finish(),
        }
    }
}

impl PartialEq for LogValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Stringified(a), Self::Stringified(b)) => match (render(&**a), render(&**b)) {
                (Ok(a), Ok(b)) => a == b,
                _ => false,
            },
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Map(a), Self::Map(b)) => a == b,
            _ => false,
        }
    }
}

impl From<&str> for LogValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for LogValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl<T: Into<LogValue>> From<Vec<T>> for LogValue {
    fn from(values: Vec<T>) -> Self {
        Self::List(values.into_iter().map(Into::into).collect())
    }
}

impl From<Metadata> for LogValue {
    fn from(map: Metadata) -> Self {
        Self::Map(map)
    }
}

impl From<f64> for LogValue {
    fn from(value: f64) -> Self {
        Self::stringified(Float(value))
    }
}

impl From<i64> for LogValue {
    fn from(value: i64) -> Self {
        Self::stringified(value)
    }
}

impl From<bool> for LogValue {
    fn from(value: bool) -> Self {
        Self::stringified(value)
    }
}

/// Floating point value with fixed tokens for the non-finite cases.
#[derive(Debug, Clone, Copy)]
struct Float(f64);

impl Display for Float {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = self.0;
        if value.is_nan() {
            f.write_str(NAN_TOKEN)
        } else if value == f64::INFINITY {
            f.write_str(POSITIVE_INFINITY_TOKEN)
        } else if value == f64::NEG_INFINITY {
            f.write_str(NEGATIVE_INFINITY_TOKEN)
        } else {
            write!(f, "{value}")
        }
    }
}

impl Serialize for LogValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Text(text) => serializer.serialize_str(text),
            Self::Stringified(value) => {
                // A failing Display impl must surface as a serializer error
                let rendered = render(&**value).map_err(|_| {
                    <S::Error as ser::Error>::custom("Display implementation returned an error")
                })?;
                serializer.serialize_str(&rendered)
            }
            Self::List(values) => {
                let mut seq = serializer.serialize_seq(Some(values.len()))?;
                for value in values {
                    seq.serialize_element(value)?;
                }
                seq.end()
            }
            Self::Map(map) => {
                let mut entries = serializer.serialize_map(Some(map.len()))?;
                for (key, value) in map {
                    entries.serialize_entry(key, value)?;
                }
                entries.end()
            }
        }
    }
}

struct LogValueVisitor;

impl<'de> Visitor<'de> for LogValueVisitor {
    type Value = LogValue;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a string, an array or an object")
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<LogValue, E> {
        Ok(LogValue::Text(value.to_string()))
    }

    fn visit_string<E: de::Error>(self, value: String) -> Result<LogValue, E> {
        Ok(LogValue::Text(value))
    }

    fn visit_unit<E: de::Error>(self) -> Result<LogValue, E> {
        Ok(LogValue::Text("null".to_string()))
    }

    fn visit_none<E: de::Error>(self) -> Result<LogValue, E> {
        self.visit_unit()
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<LogValue, A::Error> {
        let mut values = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(value) = seq.next_element()? {
            values.push(value);
        }
        Ok(LogValue::List(values))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<LogValue, A::Error> {
        let mut map = Metadata::new();
        while let Some((key, value)) = access.next_entry::<String, LogValue>()? {
            map.insert(key, value);
        }
        Ok(LogValue::Map(map))
    }
}

impl<'de> Deserialize<'de> for LogValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(LogValueVisitor)
    }
}
