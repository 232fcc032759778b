// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! Topology settings loaded from a YAML file by the driver.
//!
//! Validation is a driver-boundary concern: the cluster model itself stays
//! permissive so that tests and partial topologies (e.g. segments-only
//! fan-outs) remain expressible.

use std::{collections::HashSet, fs::File};

use serde::{Deserialize, Serialize};

use crate::{
    cluster::{SegmentConfig, MASTER_CONTENT_ID},
    error::{SettingsError, SettingsResult},
};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Settings {
    /// All segments of the cluster, master included.
    pub segments: Vec<SegmentConfig>,

    /// Optional override root for backup artifacts. When unset, artifacts
    /// live under each segment's own data directory.
    #[serde(default)]
    pub backup_dir: Option<String>,
}

impl Settings {
    /// Load the settings file and validate the topology.
    pub fn load(path: &str) -> SettingsResult<Self> {
        let reader = File::open(path).map_err(|error| SettingsError::InvalidSettings {
            file: path.to_string(),
            message: error.to_string(),
        })?;
        let settings: Settings =
            serde_yaml::from_reader(reader).map_err(|error| SettingsError::InvalidSettings {
                file: path.to_string(),
                message: error.to_string(),
            })?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> SettingsResult<()> {
        let masters = self
            .segments
            .iter()
            .filter(|segment| segment.content_id == MASTER_CONTENT_ID)
            .count();
        if masters != 1 {
            return Err(SettingsError::InvalidTopology(format!(
                "expected exactly one master (content id -1), found {masters}"
            )));
        }

        let mut seen = HashSet::new();
        for segment in &self.segments {
            if !seen.insert(segment.content_id) {
                return Err(SettingsError::InvalidTopology(format!(
                    "duplicate content id {}",
                    segment.content_id
                )));
            }
            if !segment.data_dir.starts_with('/') {
                return Err(SettingsError::InvalidTopology(format!(
                    "data directory '{}' of content {} is not absolute",
                    segment.data_dir, segment.content_id
                )));
            }
        }
        Ok(())
    }
}

/// Check that a backup key is a 14-digit `YYYYMMDDHHMMSS` string.
pub fn validate_timestamp(timestamp: &str) -> SettingsResult<()> {
    if timestamp.len() == 14 && timestamp.bytes().all(|byte| byte.is_ascii_digit()) {
        Ok(())
    } else {
        Err(SettingsError::InvalidTimestamp(timestamp.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    fn load_from_str(contents: &str) -> SettingsResult<Settings> {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        Settings::load(file.path().to_str().unwrap())
    }

    #[test]
    fn loads_a_valid_topology() {
        let settings = load_from_str(
            r#"
segments:
  - content_id: -1
    hostname: mdw
    data_dir: /data/master/gpseg-1
  - content_id: 0
    hostname: sdw1
    data_dir: /data/primary/gpseg0
backup_dir: /backups
"#,
        )
        .unwrap();

        assert_eq!(settings.segments.len(), 2);
        assert_eq!(settings.segments[0].hostname, "mdw");
        assert_eq!(settings.backup_dir.as_deref(), Some("/backups"));
    }

    #[test]
    fn rejects_a_topology_without_a_master() {
        let error = load_from_str(
            r#"
segments:
  - content_id: 0
    hostname: sdw1
    data_dir: /data/primary/gpseg0
"#,
        )
        .unwrap_err();
        assert!(matches!(error, SettingsError::InvalidTopology(_)));
    }

    #[test]
    fn rejects_duplicate_content_ids() {
        let error = load_from_str(
            r#"
segments:
  - content_id: -1
    hostname: mdw
    data_dir: /data/master/gpseg-1
  - content_id: 0
    hostname: sdw1
    data_dir: /data/primary/gpseg0
  - content_id: 0
    hostname: sdw2
    data_dir: /data/primary/gpseg0
"#,
        )
        .unwrap_err();
        assert!(matches!(error, SettingsError::InvalidTopology(_)));
    }

    #[test]
    fn rejects_relative_data_directories() {
        let error = load_from_str(
            r#"
segments:
  - content_id: -1
    hostname: mdw
    data_dir: data/master/gpseg-1
"#,
        )
        .unwrap_err();
        assert!(matches!(error, SettingsError::InvalidTopology(_)));
    }

    #[test]
    fn rejects_an_unreadable_or_malformed_file() {
        let error = Settings::load("/nonexistent/settings.yaml").unwrap_err();
        assert!(matches!(error, SettingsError::InvalidSettings { .. }));

        let error = load_from_str("segments: 42\n").unwrap_err();
        assert!(matches!(error, SettingsError::InvalidSettings { .. }));
    }

    #[test]
    fn validates_backup_timestamps() {
        validate_timestamp("20170101010101").unwrap();
        assert!(validate_timestamp("2017010101010").is_err());
        assert!(validate_timestamp("2017010101010a").is_err());
        assert!(validate_timestamp("").is_err());
    }
}
