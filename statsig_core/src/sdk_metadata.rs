use serde::{Deserialize, Serialize};

/// SDK identification attached to every request and event batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsigMetadata {
    /// SDK name. Usually, language name.
    pub sdk_type: String,
    /// Version of SDK.
    pub sdk_version: String,
    /// Random ID of this SDK instance.
    #[serde(rename = "sessionID")]
    pub session_id: String,
}

impl StatsigMetadata {
    pub fn new(sdk_type: impl Into<String>, sdk_version: impl Into<String>) -> StatsigMetadata {
        StatsigMetadata {
            sdk_type: sdk_type.into(),
            sdk_version: sdk_version.into(),
            session_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::StatsigMetadata;

    #[test]
    fn session_ids_are_unique_uuids() {
        let a = StatsigMetadata::new("rust-server", "0.1.0");
        let b = StatsigMetadata::new("rust-server", "0.1.0");

        assert_ne!(a.session_id, b.session_id);
        assert_eq!(a.session_id.len(), 36);
        assert_eq!(&a.session_id[14..15], "4");
    }

    #[test]
    fn serializes_with_wire_names() {
        let metadata = StatsigMetadata::new("rust-server", "0.1.0");
        let json = serde_json::to_value(&metadata).unwrap();

        assert_eq!(json["sdkType"], "rust-server");
        assert_eq!(json["sdkVersion"], "0.1.0");
        assert!(json["sessionID"].is_string());
    }
}
