//! Serde helpers for node payloads that mix string and number encodings.

use serde::{Deserialize, Deserializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    Number(i64),
    String(String),
}

/// Accepts `123` and `"123"`. An empty string is zero.
pub(crate) fn lenient_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    match StringOrNumber::deserialize(deserializer)? {
        StringOrNumber::Number(n) => Ok(n),
        StringOrNumber::String(s) if s.trim().is_empty() => Ok(0),
        StringOrNumber::String(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// `null` becomes the empty string.
pub(crate) fn nullable_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// `null` becomes the empty list.
pub(crate) fn nullable_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Heights {
        #[serde(deserialize_with = "lenient_i64")]
        height: i64,
        #[serde(default, deserialize_with = "nullable_string")]
        memo: String,
    }

    #[test]
    fn test_lenient_numbers() {
        let a: Heights = serde_json::from_str(r#"{"height": 42, "memo": null}"#).unwrap();
        let b: Heights = serde_json::from_str(r#"{"height": "42"}"#).unwrap();
        assert_eq!(a.height, 42);
        assert_eq!(b.height, 42);
        assert_eq!(a.memo, "");
        assert!(serde_json::from_str::<Heights>(r#"{"height": "x"}"#).is_err());
    }
}
