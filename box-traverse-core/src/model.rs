//! Plain data returned by the content API.
//!
//! Field names follow the wire format so that responses deserialize directly. Items are
//! immutable snapshots; nothing here is persisted.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Id of every user's root folder ("All Files").
pub const ROOT_FOLDER_ID: &str = "0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    File,
    Folder,
    WebLink,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::File => "file",
            ItemKind::Folder => "folder",
            ItemKind::WebLink => "web_link",
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mini user object embedded in items (`owned_by`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub login: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedLink {
    pub url: String,
    pub access: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathEntry {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathCollection {
    #[serde(default)]
    pub entries: Vec<PathEntry>,
}

/// A file, folder or web link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ItemKind,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub owned_by: Option<UserRef>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub modified_at: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub shared_link: Option<SharedLink>,
    #[serde(default)]
    pub path_collection: PathCollection,
    /// Flattened template fields; populated by [`Item::flatten_metadata`].
    #[serde(skip_deserializing, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
    /// Metadata as delivered: `{scope: {template: {field: value}}}`.
    #[serde(rename = "metadata", default, skip_serializing)]
    pub wire_metadata: Option<Map<String, Value>>,
}

impl Item {
    /// Minimal item, mostly useful for tests and for synthesising rows.
    pub fn new(id: impl Into<String>, kind: ItemKind, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            name: name.into(),
            owned_by: None,
            created_at: None,
            modified_at: None,
            size: None,
            shared_link: None,
            path_collection: PathCollection::default(),
            metadata: None,
            wire_metadata: None,
        }
    }

    pub fn owner_id(&self) -> Option<&str> {
        self.owned_by.as_ref().map(|o| o.id.as_str())
    }

    pub fn is_folder(&self) -> bool {
        self.kind == ItemKind::Folder
    }

    /// Replaces the nested scope/template wrapper with the instance fields.
    /// Calling it again is a no-op.
    pub fn flatten_metadata(&mut self) {
        if let Some(wire) = self.wire_metadata.take() {
            self.metadata = flatten_metadata(&wire);
        }
    }

    pub fn path_by_name(&self) -> String {
        let mut path: String = self
            .path_collection
            .entries
            .iter()
            .map(|e| format!("/{}", e.name))
            .collect();
        path.push('/');
        path.push_str(&self.name);
        path
    }

    pub fn path_by_id(&self) -> String {
        let mut path: String = self
            .path_collection
            .entries
            .iter()
            .map(|e| format!("/{}", e.id))
            .collect();
        path.push('/');
        path.push_str(&self.id);
        path
    }

    pub fn shared_link_url(&self) -> &str {
        self.shared_link.as_ref().map(|l| l.url.as_str()).unwrap_or("")
    }

    pub fn shared_link_access(&self) -> &str {
        self.shared_link.as_ref().map(|l| l.access.as_str()).unwrap_or("")
    }
}

/// Collapses `{scope: {template: instance}}` to `instance`.
///
/// A single scope and template is expected (the field projection asks for one). If several
/// are present the first one on the wire wins (`Map` keeps insertion order).
pub fn flatten_metadata(wire: &Map<String, Value>) -> Option<Map<String, Value>> {
    let scope = wire.values().next()?.as_object()?;
    let instance = scope.values().next()?.as_object()?;
    Some(instance.clone())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    Active,
    Inactive,
    CannotDeleteEdit,
    CannotDeleteEditUpload,
    #[serde(other)]
    Unknown,
}

/// Full user object as returned by the users endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub login: String,
    #[serde(default = "default_status")]
    pub status: UserStatus,
}

fn default_status() -> UserStatus {
    UserStatus::Active
}

impl UserProfile {
    pub fn new(id: impl Into<String>, name: impl Into<String>, login: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            login: login.into(),
            status: UserStatus::Active,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flatten_takes_the_first_scope_on_the_wire() {
        let wire: Map<String, Value> = serde_json::from_str(
            r#"{"z_scope": {"tmpl": {"vendor": "first"}}, "a_scope": {"tmpl": {"vendor": "second"}}}"#,
        )
        .unwrap();
        let flat = flatten_metadata(&wire).unwrap();
        assert_eq!(flat["vendor"], "first");
    }

    #[test]
    fn deserializes_folder_listing_entry() {
        let raw = json!({
            "type": "folder",
            "id": "101",
            "name": "Reports",
            "owned_by": {"type": "user", "id": "U1", "name": "Ann", "login": "ann@example.com"},
            "created_at": "2020-01-01T00:00:00-08:00",
            "modified_at": "2021-01-01T00:00:00-08:00",
            "size": 2048,
            "shared_link": {"url": "https://app.box.com/s/abc", "access": "open"},
            "path_collection": {"total_count": 2, "entries": [
                {"type": "folder", "id": "0", "name": "All Files"},
                {"type": "folder", "id": "100", "name": "Team"}
            ]}
        });
        let item: Item = serde_json::from_value(raw).unwrap();
        assert_eq!(item.kind, ItemKind::Folder);
        assert_eq!(item.owner_id(), Some("U1"));
        assert_eq!(item.path_by_name(), "/All Files/Team/Reports");
        assert_eq!(item.path_by_id(), "/0/100/101");
        assert_eq!(item.shared_link_access(), "open");
    }

    #[test]
    fn web_link_without_optional_fields() {
        let item: Item =
            serde_json::from_value(json!({"type": "web_link", "id": "9", "name": "Docs"})).unwrap();
        assert_eq!(item.kind, ItemKind::WebLink);
        assert_eq!(item.size, None);
        assert_eq!(item.shared_link_url(), "");
        assert_eq!(item.path_by_id(), "/9");
    }

    #[test]
    fn flattening_removes_scope_and_template() {
        let raw = json!({
            "type": "file",
            "id": "200",
            "name": "a.txt",
            "metadata": {"enterprise_42": {"contract": {"$id": "m1", "vendor": "Acme", "value": 10}}}
        });
        let mut item: Item = serde_json::from_value(raw).unwrap();
        assert!(item.metadata.is_none());

        item.flatten_metadata();
        let fields = item.metadata.clone().unwrap();
        assert_eq!(fields.get("vendor"), Some(&json!("Acme")));
        assert_eq!(fields.get("value"), Some(&json!(10)));
        assert!(item.wire_metadata.is_none());

        item.flatten_metadata();
        assert_eq!(item.metadata, Some(fields));
    }

    #[test]
    fn unknown_user_status_is_tolerated() {
        let user: UserProfile = serde_json::from_value(
            json!({"id": "5", "name": "Bo", "login": "bo@example.com", "status": "pending"}),
        )
        .unwrap();
        assert_eq!(user.status, UserStatus::Unknown);
        assert!(!user.is_active());
    }
}
