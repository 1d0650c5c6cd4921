/// Record types stored in buckets by the integration tests
use super::{BucketRecord, Deserialize, Serialize};

/// Timestamp (seconds) the clip fixtures are placed around
pub const BASE_TS: i64 = 1_700_000_000;

/// Camera clip bucketed per user, indexed by serial number and tags
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct VideoClip {
    pub trace_id: String,
    pub user_id: u64,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub image_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_timestamp: Option<i64>,
    #[serde(rename = "bizId", default, skip_serializing_if = "Option::is_none")]
    pub biz_id: Option<String>,
}

impl BucketRecord for VideoClip {
    const TABLE: &'static str = "tests_video_clips";
    const HASH_KEY: &'static str = "trace_id";
    const RANGE_KEY: Option<&'static str> = Some("user_id");
    const BUCKET_ID_FIELD: Option<&'static str> = Some("user_id");
    const TIMESTAMP_FIELD: Option<&'static str> = Some("timestamp");
    const INDEX_FIELDS: &'static [&'static str] = &["serial_number", "tags"];
}

#[allow(dead_code)]
impl VideoClip {
    pub fn new(trace_id: &str, user_id: u64, timestamp: i64) -> Self {
        Self {
            trace_id: trace_id.to_string(),
            user_id,
            timestamp,
            serial_number: None,
            tags: Vec::new(),
            image_url: format!("https://img.example.com/{trace_id}.jpg"),
            ttl_timestamp: None,
            biz_id: None,
        }
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|tag| tag.to_string()).collect();
        self
    }

    pub fn with_serial_number(mut self, serial_number: &str) -> Self {
        self.serial_number = Some(serial_number.to_string());
        self
    }

    pub fn with_ttl(mut self, ttl_timestamp: i64) -> Self {
        self.ttl_timestamp = Some(ttl_timestamp);
        self
    }

    /// The record as it reads back after `add`
    pub fn stored_as(&self, biz_id: &str) -> Self {
        Self {
            biz_id: Some(biz_id.to_string()),
            ..self.clone()
        }
    }
}

/// Note keyed by hash only; its partition is the hash key itself
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct Note {
    pub note_id: String,
    pub created_at: i64,
    pub body: String,
}

impl BucketRecord for Note {
    const TABLE: &'static str = "tests_notes";
    const HASH_KEY: &'static str = "note_id";
    const TIMESTAMP_FIELD: Option<&'static str> = Some("created_at");
}
