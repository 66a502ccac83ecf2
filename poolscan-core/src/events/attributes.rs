//! The loosely typed attribute list every raw event carries, plus the three
//! coercions the decoders build on.

use poolscan_sdk::objects::{Asset, Coin, PoolStatus};
use serde_json::Value;

use super::decode::DecodeError;

/// Ordered key/value pairs. Keys may repeat (gas, errata, reward pools).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes(Vec<(String, String)>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.push((key.into(), value.into()));
    }

    /// First value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Every value for `key`, in wire order.
    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.0
            .iter()
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn require(&self, key: &str) -> Result<&str, DecodeError> {
        self.get(key)
            .ok_or_else(|| DecodeError::Missing(key.to_owned()))
    }

    /// Required integer attribute.
    pub fn int(&self, key: &str) -> Result<i64, DecodeError> {
        parse_int(key, self.require(key)?)
    }

    /// Integer attribute that is zero when absent or empty.
    pub fn int_or_zero(&self, key: &str) -> Result<i64, DecodeError> {
        match self.get(key) {
            None | Some("") => Ok(0),
            Some(value) => parse_int(key, value),
        }
    }

    /// Flattens a feed event's JSON body into attributes.
    ///
    /// Scalars become one pair each, arrays of scalars repeat their key, and
    /// arrays of objects (or nested objects) contribute their own keys in
    /// order.
    pub fn from_json(value: &Value) -> Self {
        let mut attributes = Self::new();
        if let Value::Object(map) = value {
            for (key, value) in map {
                attributes.flatten_into(key, value);
            }
        }
        attributes
    }

    fn flatten_into(&mut self, key: &str, value: &Value) {
        match value {
            Value::Object(map) => {
                for (inner_key, inner) in map {
                    self.flatten_into(inner_key, inner);
                }
            }
            Value::Array(items) => {
                for item in items {
                    self.flatten_into(key, item);
                }
            }
            Value::Null => self.push(key, ""),
            Value::String(s) => self.push(key, s.as_str()),
            Value::Bool(b) => self.push(key, b.to_string()),
            Value::Number(n) => self.push(key, n.to_string()),
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Attributes {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

pub(crate) fn parse_int(key: &str, value: &str) -> Result<i64, DecodeError> {
    value.trim().parse().map_err(|_| DecodeError::Invalid {
        key: key.to_owned(),
        value: value.to_owned(),
    })
}

pub(crate) fn parse_bool(key: &str, value: &str) -> Result<bool, DecodeError> {
    match value.trim() {
        v if v.eq_ignore_ascii_case("true") => Ok(true),
        v if v.eq_ignore_ascii_case("false") || v.is_empty() => Ok(false),
        _ => Err(DecodeError::Invalid {
            key: key.to_owned(),
            value: value.to_owned(),
        }),
    }
}

/// Parses a coin list of the form `"100 BNB.BNB, 2000 THOR.RUNE"`.
///
/// An empty string is an empty list.
pub fn parse_coins(value: &str) -> Result<Vec<Coin>, DecodeError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            let invalid = || DecodeError::Invalid {
                key: "coins".to_owned(),
                value: part.to_owned(),
            };
            let mut fields = part.split_whitespace();
            let (Some(amount), Some(asset), None) = (fields.next(), fields.next(), fields.next())
            else {
                return Err(invalid());
            };
            let amount = amount.parse().map_err(|_| invalid())?;
            Ok(Coin::new(parse_asset(asset)?, amount))
        })
        .collect()
}

pub fn parse_asset(value: &str) -> Result<Asset, DecodeError> {
    Ok(value.parse()?)
}

/// Unrecognised statuses fall back to `Suspended`.
pub fn parse_pool_status(value: &str) -> PoolStatus {
    value.parse().unwrap_or(PoolStatus::Suspended)
}
