//! Runtime configuration of a traversal.
//!
//! The CLI loads this from YAML (or JSON) with camelCase keys and then calls
//! [`TraverseConfig::validate`], which decides how target users are enumerated.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::contract::PaginationStyle;
use crate::error::ConfigError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BoxAppSettings {
    #[serde(rename = "clientID")]
    pub client_id: String,
    #[serde(rename = "clientSecret")]
    pub client_secret: String,
    #[serde(rename = "enterpriseID")]
    pub enterprise_id: String,
    pub api_base_url: Option<String>,
    pub upload_base_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CsvColumns {
    pub owner_login: Vec<String>,
    pub item_id: Vec<String>,
    #[serde(rename = "type")]
    pub item_type: Vec<String>,
}

impl Default for CsvColumns {
    fn default() -> Self {
        Self {
            owner_login: vec!["owner_login".into(), "Owner Login".into()],
            item_id: vec!["item_id".into(), "Folder/File ID".into()],
            item_type: vec!["type".into(), "path".into(), "Path".into()],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CsvSettings {
    pub enabled: bool,
    pub file_path: Option<PathBuf>,
    pub columns: CsvColumns,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllowlistEntry {
    #[serde(rename = "ownerID")]
    pub owner_id: String,
    #[serde(rename = "folderIDs", default)]
    pub folder_ids: Vec<String>,
    #[serde(default = "default_true")]
    pub follow_all_child_items: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Allowlist {
    pub enabled: bool,
    pub items: Vec<AllowlistEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Denylist {
    pub enabled: bool,
    pub users: Vec<String>,
    pub folders: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NonOwnedItems {
    pub skip: bool,
    pub audit: bool,
}

impl Default for NonOwnedItems {
    fn default() -> Self {
        Self {
            skip: true,
            audit: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay_ms: 500,
            max_delay_ms: 60_000,
        }
    }
}

impl RetrySettings {
    /// Delay before retry number `attempt` (1-based). The server hint wins when it is longer.
    pub fn backoff(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let exp = attempt.saturating_sub(1).min(30);
        let computed = self
            .base_delay_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_delay_ms);
        let computed = Duration::from_millis(computed);
        match retry_after {
            Some(hint) if hint > computed => hint,
            _ => computed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuditReportSettings {
    pub directory: PathBuf,
    pub upload_to_box: bool,
    pub upload_folder_id: Option<String>,
    pub metadata_fields: Vec<String>,
}

impl Default for AuditReportSettings {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("reports"),
            upload_to_box: false,
            upload_folder_id: None,
            metadata_fields: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UserLogicKind {
    #[default]
    None,
    ModifySharedLinks,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserDefinedLogic {
    pub kind: UserLogicKind,
    pub match_shared_link_access_level: Option<String>,
    pub new_shared_link_access_level: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TraverseConfig {
    pub box_app_settings: BoxAppSettings,
    pub csv: CsvSettings,
    pub allowlist: Allowlist,
    pub denylist: Denylist,
    pub non_owned_items: NonOwnedItems,
    pub audit_traversal: bool,
    pub modify_data: bool,
    pub max_queue_tasks_per_second: usize,
    pub max_concurrent_users: usize,
    pub box_item_fields: Vec<String>,
    pub page_size: u32,
    pub pagination: PaginationStyle,
    pub retry: RetrySettings,
    pub audit_report: AuditReportSettings,
    pub user_defined_logic: UserDefinedLogic,
    pub log_level: Option<String>,
}

impl Default for TraverseConfig {
    fn default() -> Self {
        Self {
            box_app_settings: BoxAppSettings::default(),
            csv: CsvSettings::default(),
            allowlist: Allowlist::default(),
            denylist: Denylist::default(),
            non_owned_items: NonOwnedItems::default(),
            audit_traversal: true,
            modify_data: false,
            max_queue_tasks_per_second: 16,
            max_concurrent_users: 8,
            box_item_fields: default_item_fields(),
            page_size: 1000,
            pagination: PaginationStyle::Offset,
            retry: RetrySettings::default(),
            audit_report: AuditReportSettings::default(),
            user_defined_logic: UserDefinedLogic::default(),
            log_level: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_item_fields() -> Vec<String> {
    [
        "type",
        "id",
        "name",
        "owned_by",
        "created_at",
        "modified_at",
        "size",
        "shared_link",
        "path_collection",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Where the set of users to traverse comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumerationMode {
    /// Every managed user in the enterprise.
    Directory,
    /// Only the owners and folders listed in `allowlist.items`.
    Allowlist,
    /// Owner/item rows read from a CSV file.
    Csv,
}

impl TraverseConfig {
    pub fn trace_loaded(&self) {
        info!(
            enterprise_id = %self.box_app_settings.enterprise_id,
            csv = self.csv.enabled,
            allowlist = self.allowlist.enabled,
            denylist = self.denylist.enabled,
            audit_traversal = self.audit_traversal,
            modify_data = self.modify_data,
            max_queue_tasks_per_second = self.max_queue_tasks_per_second,
            max_concurrent_users = self.max_concurrent_users,
            "Loaded TraverseConfig"
        );
        debug!(
            allowlist_items = self.allowlist.items.len(),
            denylist_users = self.denylist.users.len(),
            denylist_folders = self.denylist.folders.len(),
            page_size = self.page_size,
            pagination = ?self.pagination,
            retry = ?self.retry,
            "TraverseConfig details"
        );
    }

    /// Checks cross-field rules and returns the enumeration mode they imply.
    pub fn validate(&self) -> Result<EnumerationMode, ConfigError> {
        if self.max_queue_tasks_per_second == 0 {
            return Err(ConfigError::ZeroLimit("maxQueueTasksPerSecond"));
        }
        if self.max_concurrent_users == 0 {
            return Err(ConfigError::ZeroLimit("maxConcurrentUsers"));
        }
        if self.page_size == 0 {
            return Err(ConfigError::ZeroLimit("pageSize"));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ZeroLimit("retry.maxAttempts"));
        }
        if self.audit_report.upload_to_box
            && self
                .audit_report
                .upload_folder_id
                .as_deref()
                .map_or(true, |id| id.trim().is_empty())
        {
            return Err(ConfigError::MissingUploadFolder);
        }
        if self.user_defined_logic.kind == UserLogicKind::ModifySharedLinks {
            if self.user_defined_logic.match_shared_link_access_level.is_none() {
                return Err(ConfigError::MissingSharedLinkLevel(
                    "matchSharedLinkAccessLevel",
                ));
            }
            if self.user_defined_logic.new_shared_link_access_level.is_none() {
                return Err(ConfigError::MissingSharedLinkLevel(
                    "newSharedLinkAccessLevel",
                ));
            }
        }

        if self.csv.enabled {
            if self.allowlist.enabled || self.denylist.enabled {
                return Err(ConfigError::CsvWithLists);
            }
            if self.csv.file_path.is_none() {
                return Err(ConfigError::MissingCsvPath);
            }
            return Ok(EnumerationMode::Csv);
        }

        if self.allowlist.enabled {
            if self.denylist.enabled {
                warn!("Both allowlist and denylist are enabled; denylisted users will be ignored, denylisted folders still apply");
            }
            return Ok(EnumerationMode::Allowlist);
        }

        Ok(EnumerationMode::Directory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(raw: &str) -> TraverseConfig {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn empty_document_uses_defaults() {
        let cfg = parse("{}");
        assert_eq!(cfg, TraverseConfig::default());
        assert_eq!(cfg.validate(), Ok(EnumerationMode::Directory));
    }

    #[test]
    fn camel_case_keys_are_recognised() {
        let cfg = parse(
            r#"{
                "boxAppSettings": {"clientID": "cid", "clientSecret": "sec", "enterpriseID": "42"},
                "allowlist": {"enabled": true, "items": [
                    {"ownerID": "U1", "folderIDs": ["100"], "followAllChildItems": false}
                ]},
                "nonOwnedItems": {"skip": true, "audit": true},
                "maxQueueTasksPerSecond": 4,
                "pagination": "marker",
                "retry": {"maxAttempts": 3}
            }"#,
        );
        assert_eq!(cfg.box_app_settings.client_id, "cid");
        assert_eq!(cfg.allowlist.items[0].folder_ids, vec!["100"]);
        assert!(!cfg.allowlist.items[0].follow_all_child_items);
        assert!(cfg.non_owned_items.audit);
        assert_eq!(cfg.max_queue_tasks_per_second, 4);
        assert_eq!(cfg.pagination, PaginationStyle::Marker);
        assert_eq!(cfg.retry.max_attempts, 3);
        assert_eq!(cfg.retry.base_delay_ms, 500);
        assert_eq!(cfg.validate(), Ok(EnumerationMode::Allowlist));
    }

    #[test]
    fn csv_cannot_be_combined_with_lists() {
        let mut cfg = TraverseConfig::default();
        cfg.csv.enabled = true;
        cfg.csv.file_path = Some("rows.csv".into());
        cfg.denylist.enabled = true;
        assert_eq!(cfg.validate(), Err(ConfigError::CsvWithLists));

        cfg.denylist.enabled = false;
        assert_eq!(cfg.validate(), Ok(EnumerationMode::Csv));
    }

    #[test]
    fn numeric_limits_must_be_positive() {
        let mut cfg = TraverseConfig::default();
        cfg.max_concurrent_users = 0;
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::ZeroLimit("maxConcurrentUsers"))
        );
    }

    #[test]
    fn shared_link_logic_requires_both_levels() {
        let mut cfg = TraverseConfig::default();
        cfg.user_defined_logic.kind = UserLogicKind::ModifySharedLinks;
        cfg.user_defined_logic.match_shared_link_access_level = Some("open".into());
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::MissingSharedLinkLevel("newSharedLinkAccessLevel"))
        );
    }

    #[test]
    fn upload_requires_folder() {
        let mut cfg = TraverseConfig::default();
        cfg.audit_report.upload_to_box = true;
        assert_eq!(cfg.validate(), Err(ConfigError::MissingUploadFolder));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let retry = RetrySettings {
            max_attempts: 10,
            base_delay_ms: 100,
            max_delay_ms: 1_000,
        };
        assert_eq!(retry.backoff(1, None), Duration::from_millis(100));
        assert_eq!(retry.backoff(3, None), Duration::from_millis(400));
        assert_eq!(retry.backoff(9, None), Duration::from_millis(1_000));
        assert_eq!(
            retry.backoff(1, Some(Duration::from_secs(5))),
            Duration::from_secs(5)
        );
    }
}
