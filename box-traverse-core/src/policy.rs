//! Per-item accept/skip rules applied while walking a folder.

use std::collections::HashSet;

use crate::config::TraverseConfig;
use crate::model::{Item, ROOT_FOLDER_ID};

/// Immutable traversal policy, derived once from the config.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Policy {
    pub skip_non_owned: bool,
    pub audit_non_owned: bool,
    pub denylist_enabled: bool,
    pub denied_users: HashSet<String>,
    pub denied_folders: HashSet<String>,
    pub audit_traversal: bool,
    pub modify_data: bool,
}

impl Policy {
    pub fn from_config(config: &TraverseConfig) -> Self {
        Self {
            skip_non_owned: config.non_owned_items.skip,
            audit_non_owned: config.non_owned_items.audit,
            denylist_enabled: config.denylist.enabled,
            denied_users: config.denylist.users.iter().cloned().collect(),
            denied_folders: config.denylist.folders.iter().cloned().collect(),
            audit_traversal: config.audit_traversal,
            modify_data: config.modify_data,
        }
    }

    pub fn is_user_denied(&self, user_id: &str) -> bool {
        self.denylist_enabled && self.denied_users.contains(user_id)
    }

    pub fn is_folder_denied(&self, folder_id: &str) -> bool {
        self.denylist_enabled && self.denied_folders.contains(folder_id)
    }

    /// Decides what happens to `item`, found while listing `folder_id` as `owner_id`.
    pub fn evaluate(&self, owner_id: &str, folder_id: &str, item: &Item, follow: bool) -> Decision {
        // An item without `owned_by` (field not requested) counts as not owned.
        if folder_id == ROOT_FOLDER_ID
            && self.skip_non_owned
            && item.owner_id() != Some(owner_id)
        {
            return Decision::SkipNonOwned {
                audit: self.audit_non_owned,
            };
        }

        if item.is_folder() && self.is_folder_denied(&item.id) {
            return Decision::SkipDenied;
        }

        Decision::Accept {
            recurse: item.is_folder() && follow,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Shared into the owner's root by someone else.
    SkipNonOwned { audit: bool },
    /// Folder on the deny-list.
    SkipDenied,
    Accept { recurse: bool },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ItemKind, UserRef};

    fn owned(id: &str, kind: ItemKind, owner: &str) -> Item {
        let mut item = Item::new(id, kind, format!("item-{id}"));
        item.owned_by = Some(UserRef {
            id: owner.into(),
            ..UserRef::default()
        });
        item
    }

    fn policy() -> Policy {
        Policy {
            skip_non_owned: true,
            audit_non_owned: true,
            denylist_enabled: true,
            denied_folders: ["999".to_string()].into_iter().collect(),
            ..Policy::default()
        }
    }

    #[test]
    fn non_owned_items_in_root_are_skipped() {
        let item = owned("5", ItemKind::File, "U2");
        assert_eq!(
            policy().evaluate("U1", ROOT_FOLDER_ID, &item, true),
            Decision::SkipNonOwned { audit: true }
        );
    }

    #[test]
    fn root_item_without_owner_is_treated_as_non_owned() {
        let item = Item::new("5", ItemKind::File, "unknown.txt");
        assert_eq!(
            policy().evaluate("U1", ROOT_FOLDER_ID, &item, true),
            Decision::SkipNonOwned { audit: true }
        );

        let keep_all = Policy {
            skip_non_owned: false,
            ..policy()
        };
        assert_eq!(
            keep_all.evaluate("U1", ROOT_FOLDER_ID, &item, true),
            Decision::Accept { recurse: false }
        );
    }

    #[test]
    fn owned_root_items_are_accepted() {
        let item = owned("6", ItemKind::Folder, "U1");
        assert_eq!(
            policy().evaluate("U1", ROOT_FOLDER_ID, &item, true),
            Decision::Accept { recurse: true }
        );
    }

    #[test]
    fn non_owned_items_below_root_are_accepted() {
        let item = owned("5", ItemKind::File, "U2");
        assert_eq!(
            policy().evaluate("U1", "100", &item, true),
            Decision::Accept { recurse: false }
        );
    }

    #[test]
    fn denied_folder_is_skipped() {
        let item = owned("999", ItemKind::Folder, "U1");
        assert_eq!(
            policy().evaluate("U1", "100", &item, true),
            Decision::SkipDenied
        );

        let disabled = Policy {
            denylist_enabled: false,
            ..policy()
        };
        assert_eq!(
            disabled.evaluate("U1", "100", &item, true),
            Decision::Accept { recurse: true }
        );
    }

    #[test]
    fn folders_recurse_only_when_following() {
        let item = owned("101", ItemKind::Folder, "U1");
        assert_eq!(
            policy().evaluate("U1", "100", &item, false),
            Decision::Accept { recurse: false }
        );
    }
}
