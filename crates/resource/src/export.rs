use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

/// Persisted form of the whole cache, keyed by resource id.
pub type ResourceExport = BTreeMap<String, ExportedResource>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedResource {
    pub id: String,
    pub source: String,
    #[serde(serialize_with = "encode", deserialize_with = "decode")]
    pub data: Vec<u8>,
}
impl ExportedResource {
    pub fn new(id: impl Into<String>, source: impl Into<String>, data: &[u8]) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            data: data.to_vec(),
        }
    }
}

fn encode<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(data))
}

fn decode<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let encoded = String::deserialize(deserializer)?;
    STANDARD.decode(encoded.as_bytes()).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_is_base64_in_json() {
        let resource = ExportedResource::new("res_cover.jpg", "cover.jpg", &[0xff, 0xd8, 0xff]);
        let json = serde_json::to_string(&resource).unwrap();
        assert_eq!(json, r#"{"id":"res_cover.jpg","source":"cover.jpg","data":"/9j/"}"#);
        let back: ExportedResource = serde_json::from_str(&json).unwrap();
        assert_eq!(back, resource);
    }

    #[test]
    fn test_rejects_invalid_base64() {
        let err = serde_json::from_str::<ExportedResource>(r#"{"id":"a","source":"b","data":"***"}"#);
        assert!(err.is_err());
    }
}
