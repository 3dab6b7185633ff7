use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Contents of `<name>/metadata.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metadata {
    pub current_version: String,
    pub versions: Vec<VersionMetadata>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionMetadata {
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub data_size: usize,
}

/// Public view of one retained version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    pub timestamp: DateTime<Utc>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_version(&mut self, version: String, data_size: usize) {
        let version_meta = VersionMetadata {
            version: version.clone(),
            timestamp: Utc::now(),
            data_size,
        };
        self.versions.push(version_meta);
        self.current_version = version;
    }

    pub fn next_version(&self) -> String {
        format!("v{}", self.next_version_number())
    }

    pub fn next_version_number(&self) -> u32 {
        self.versions
            .iter()
            .filter_map(|v| {
                v.version
                    .strip_prefix('v')
                    .and_then(|n| n.parse::<u32>().ok())
            })
            .max()
            .unwrap_or(0)
            + 1
    }

    pub fn contains(&self, version: &str) -> bool {
        self.versions.iter().any(|v| v.version == version)
    }

    pub fn version_infos(&self) -> Vec<VersionInfo> {
        self.versions
            .iter()
            .map(|v| VersionInfo {
                version: v.version.clone(),
                timestamp: v.timestamp,
            })
            .collect()
    }
}
