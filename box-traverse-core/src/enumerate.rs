//! Turns the configured scope into a list of users to traverse and where to start for each.

use std::collections::HashMap;

use tracing::{info, warn};

use crate::config::Allowlist;
use crate::contract::{PageRequest, PaginationStyle, ServiceAccount};
use crate::error::ApiError;
use crate::input::CsvRow;
use crate::model::{ItemKind, UserProfile, ROOT_FOLDER_ID};
use crate::policy::Policy;
use crate::stats::{Event, TraversalStats};

/// Starting point of a traversal for one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Seed {
    /// Walk a folder. `follow` enables recursion into subfolders.
    Folder { id: String, follow: bool },
    /// Act on one item without walking anything.
    Item { id: String, kind: ItemKind },
}

/// One user to traverse, with every seed collected for them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserTarget {
    pub user_id: String,
    pub seeds: Vec<Seed>,
}

/// Every managed user in the enterprise, all pages.
pub async fn list_enterprise_users(
    service: &dyn ServiceAccount,
    page_size: u32,
) -> Result<Vec<UserProfile>, ApiError> {
    let mut users = Vec::new();
    let mut cursor = PaginationStyle::Offset.first_cursor();
    loop {
        let page = service
            .list_enterprise_users(PageRequest {
                cursor: cursor.clone(),
                limit: page_size,
            })
            .await?;
        users.extend(page.entries);
        info!(
            correlation_id = "N/A",
            action = "RETRIEVE_ENTERPRISE_USERS_PAGE",
            "Retrieved {} of {} enterprise users",
            users.len(),
            page.total_count.map_or_else(|| "?".to_string(), |t| t.to_string())
        );
        match page.next {
            Some(next) if next != cursor => cursor = next,
            _ => break,
        }
    }
    Ok(users)
}

/// Directory mode: every active, non-denied user, starting at their root folder.
pub async fn directory_targets(
    service: &dyn ServiceAccount,
    policy: &Policy,
    page_size: u32,
    stats: &TraversalStats,
) -> Result<Vec<UserTarget>, ApiError> {
    let users = list_enterprise_users(service, page_size).await?;
    let mut targets = Vec::new();
    for user in users {
        if policy.is_user_denied(&user.id) {
            stats.bump(Event::UserSkipped);
            warn!(
                correlation_id = "N/A",
                action = "IGNORE_USER",
                owner_id = %user.id,
                "User \"{}\" is included in configured denylist - Ignoring",
                user.name
            );
            continue;
        }
        if !user.is_active() {
            stats.bump(Event::UserSkipped);
            warn!(
                correlation_id = "N/A",
                action = "NON_ACTIVE_USER",
                owner_id = %user.id,
                status = ?user.status,
                "User \"{}\" has a non-active status - Ignoring",
                user.name
            );
            continue;
        }
        stats.bump(Event::UserEnumerated);
        targets.push(UserTarget {
            user_id: user.id,
            seeds: vec![Seed::Folder {
                id: ROOT_FOLDER_ID.to_string(),
                follow: true,
            }],
        });
    }
    Ok(targets)
}

/// Allow-list mode. Entries for the same owner are merged, in order of first appearance.
pub fn allowlist_targets(allowlist: &Allowlist, stats: &TraversalStats) -> Vec<UserTarget> {
    let mut targets: Vec<UserTarget> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for entry in &allowlist.items {
        let pos = *index.entry(entry.owner_id.clone()).or_insert_with(|| {
            stats.bump(Event::UserEnumerated);
            targets.push(UserTarget {
                user_id: entry.owner_id.clone(),
                seeds: Vec::new(),
            });
            targets.len() - 1
        });
        targets[pos]
            .seeds
            .extend(entry.folder_ids.iter().map(|id| Seed::Folder {
                id: id.clone(),
                follow: entry.follow_all_child_items,
            }));
    }
    targets
}

/// CSV mode: resolve each row's owner login against the directory and group rows per owner.
pub async fn csv_targets(
    service: &dyn ServiceAccount,
    rows: Vec<CsvRow>,
    page_size: u32,
    stats: &TraversalStats,
) -> Result<Vec<UserTarget>, ApiError> {
    let users = list_enterprise_users(service, page_size).await?;
    let by_login: HashMap<String, &UserProfile> = users
        .iter()
        .map(|u| (u.login.to_lowercase(), u))
        .collect();

    let mut targets: Vec<UserTarget> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for row in rows {
        let Some(user) = by_login.get(&row.owner_login.to_lowercase()) else {
            stats.bump(Event::UserSkipped);
            warn!(
                correlation_id = "N/A",
                action = "USER_NOT_FOUND",
                login = %row.owner_login,
                "No enterprise user found for \"{}\" - Ignoring {} {}",
                row.owner_login,
                row.kind,
                row.item_id
            );
            continue;
        };
        if !user.is_active() {
            stats.bump(Event::UserSkipped);
            warn!(
                correlation_id = "N/A",
                action = "NON_ACTIVE_USER",
                owner_id = %user.id,
                "User \"{}\" has a non-active status - Ignoring {} {}",
                user.name,
                row.kind,
                row.item_id
            );
            continue;
        }
        info!(
            correlation_id = "N/A",
            action = "PARSE_CSV_ROW",
            "Processing {} \"{}\" owned by {}",
            row.kind,
            row.item_id,
            row.owner_login
        );

        let pos = *index.entry(user.id.clone()).or_insert_with(|| {
            stats.bump(Event::UserEnumerated);
            targets.push(UserTarget {
                user_id: user.id.clone(),
                seeds: Vec::new(),
            });
            targets.len() - 1
        });
        targets[pos].seeds.push(Seed::Item {
            id: row.item_id,
            kind: row.kind,
        });
    }
    Ok(targets)
}
