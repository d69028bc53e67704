use super::error::{CoreError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Serializes a payload to bytes using JSON.
///
/// # Errors
/// Returns `CoreError::Serialization` if the value cannot be serialized.
pub fn serialize_value<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(CoreError::Serialization)
}

/// Deserializes bytes back into a payload using JSON.
///
/// # Errors
/// Returns `CoreError::Deserialization` if the bytes cannot be decoded.
pub fn deserialize_value<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(CoreError::Deserialization)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let value = vec!["hello".to_string(), "world".to_string()];
        let bytes = serialize_value(&value).unwrap();
        let decoded: Vec<String> = deserialize_value(&bytes).unwrap();
        assert_eq!(value, decoded);
    }

    #[test]
    fn test_deserialize_garbage() {
        let result: Result<Vec<String>> = deserialize_value(b"not json");
        assert!(result.is_err());
    }
}
