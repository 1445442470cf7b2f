//! Key/value serialization strategies
//!
//! Dictionaries never inspect the types they store; callers pick the
//! strategy once, at construction time, based on what their value types
//! need.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// How keys and values are turned into bytes before they reach a table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SerializationStrategy {
    /// Compact binary encoding (bincode). Fast, but the format is not
    /// self-describing, so types that rely on `deserialize_any`
    /// (`#[serde(flatten)]`, untagged enums, `serde_json::Value`) cannot
    /// be read back.
    #[default]
    Compact,
    /// Self-describing encoding (JSON). Slower and larger, but round-trips
    /// every serde data model shape.
    SelfDescribing,
}

impl SerializationStrategy {
    /// Serialize `value` to bytes
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        match self {
            SerializationStrategy::Compact => Ok(bincode::serialize(value)?),
            SerializationStrategy::SelfDescribing => Ok(serde_json::to_vec(value)?),
        }
    }

    /// Deserialize bytes produced by [`encode`](Self::encode)
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        match self {
            SerializationStrategy::Compact => Ok(bincode::deserialize(bytes)?),
            SerializationStrategy::SelfDescribing => Ok(serde_json::from_slice(bytes)?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::collections::BTreeMap;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Headers {
        method: String,
        #[serde(flatten)]
        extra: BTreeMap<String, String>,
    }

    fn headers() -> Headers {
        let mut extra = BTreeMap::new();
        extra.insert("host".to_string(), "example.com".to_string());
        Headers {
            method: "GET".to_string(),
            extra,
        }
    }

    #[test]
    fn test_compact_roundtrip() {
        let strategy = SerializationStrategy::Compact;
        let bytes = strategy.encode(&(1u32, "abc".to_string())).unwrap();
        let decoded: (u32, String) = strategy.decode(&bytes).unwrap();
        assert_eq!(decoded, (1, "abc".to_string()));
    }

    #[test]
    fn test_flattened_map_needs_self_describing() {
        let compact = SerializationStrategy::Compact;
        let result = compact
            .encode(&headers())
            .and_then(|bytes| compact.decode::<Headers>(&bytes));
        assert!(matches!(result, Err(Error::Serialization(_))));

        let json = SerializationStrategy::SelfDescribing;
        let bytes = json.encode(&headers()).unwrap();
        let decoded: Headers = json.decode(&bytes).unwrap();
        assert_eq!(decoded, headers());
    }

    #[test]
    fn test_default_is_compact() {
        assert_eq!(SerializationStrategy::default(), SerializationStrategy::Compact);
    }
}
