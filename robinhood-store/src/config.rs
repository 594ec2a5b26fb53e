//! Plain-struct hierarchical configuration (spec §0): one `Config` tree,
//! deserialized from YAML/JSON with `serde`, no config-crate macros —
//! matching the teacher's preference for small, explicit config structs
//! over a generic layered-config framework.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub mount: MountConfig,
    #[serde(default)]
    pub mongo: MongoConfig,
    #[serde(default)]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub changelog: Option<ChangelogConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountConfig {
    pub path: PathBuf,
    /// Informational only; surfaced via `get_info(MOUNTPOINT)`.
    #[serde(default)]
    pub device: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoConfig {
    #[serde(default = "default_mongo_address")]
    pub address: String,
    pub database: String,
    /// Socket timeout in milliseconds; `None` means effectively
    /// unlimited (spec §4.11 "Connection").
    #[serde(default)]
    pub cursor_timeout_ms: Option<u64>,
}

fn default_mongo_address() -> String {
    "mongodb://localhost:27017".to_string()
}

impl Default for MongoConfig {
    fn default() -> Self {
        MongoConfig {
            address: default_mongo_address(),
            database: "robinhood".to_string(),
            cursor_timeout_ms: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangelogConfig {
    pub mdt: String,
    pub user: String,
    #[serde(default)]
    pub dump_file: Option<PathBuf>,
    /// Whether consecutive changelog records may be coalesced into one
    /// batch (spec §4.9 "save_batch(ack_required, dedup)").
    #[serde(default = "default_true")]
    pub dedup: bool,
}

fn default_true() -> bool {
    true
}

impl Config {
    pub fn from_yaml_str(s: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let yaml = r#"
mount:
  path: /mnt/lustre
mongo:
  database: rbh_test
"#;
        let cfg = Config::from_yaml_str(yaml).unwrap();
        assert_eq!(cfg.mount.path, PathBuf::from("/mnt/lustre"));
        assert_eq!(cfg.mongo.address, "mongodb://localhost:27017");
        assert_eq!(cfg.mongo.database, "rbh_test");
    }
}
