use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Live counters shared by every task of a run.
#[derive(Debug, Default)]
pub struct TraversalStats {
    users_enumerated: AtomicU64,
    users_registered: AtomicU64,
    users_skipped: AtomicU64,
    folders_listed: AtomicU64,
    items_fetched: AtomicU64,
    items_dispatched: AtomicU64,
    items_skipped: AtomicU64,
    actions_failed: AtomicU64,
    retries: AtomicU64,
    abandoned: AtomicU64,
}

/// Something worth counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    UserEnumerated,
    UserRegistered,
    UserSkipped,
    FolderListed,
    ItemFetched,
    ItemDispatched,
    ItemSkipped,
    ActionFailed,
    Retry,
    Abandoned,
}

impl TraversalStats {
    pub fn bump(&self, event: Event) {
        let counter = match event {
            Event::UserEnumerated => &self.users_enumerated,
            Event::UserRegistered => &self.users_registered,
            Event::UserSkipped => &self.users_skipped,
            Event::FolderListed => &self.folders_listed,
            Event::ItemFetched => &self.items_fetched,
            Event::ItemDispatched => &self.items_dispatched,
            Event::ItemSkipped => &self.items_skipped,
            Event::ActionFailed => &self.actions_failed,
            Event::Retry => &self.retries,
            Event::Abandoned => &self.abandoned,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

impl TraversalStats {
    pub fn snapshot(&self) -> RunSummary {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        RunSummary {
            users_enumerated: get(&self.users_enumerated),
            users_registered: get(&self.users_registered),
            users_skipped: get(&self.users_skipped),
            folders_listed: get(&self.folders_listed),
            items_fetched: get(&self.items_fetched),
            items_dispatched: get(&self.items_dispatched),
            items_skipped: get(&self.items_skipped),
            actions_failed: get(&self.actions_failed),
            retries: get(&self.retries),
            abandoned: get(&self.abandoned),
        }
    }
}

/// Final counts of a run, printed by the CLI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub users_enumerated: u64,
    pub users_registered: u64,
    pub users_skipped: u64,
    pub folders_listed: u64,
    pub items_fetched: u64,
    pub items_dispatched: u64,
    pub items_skipped: u64,
    pub actions_failed: u64,
    pub retries: u64,
    pub abandoned: u64,
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "users enumerated: {}", self.users_enumerated)?;
        writeln!(f, "users registered: {}", self.users_registered)?;
        writeln!(f, "users skipped:    {}", self.users_skipped)?;
        writeln!(f, "folders listed:   {}", self.folders_listed)?;
        writeln!(f, "items fetched:    {}", self.items_fetched)?;
        writeln!(f, "items dispatched: {}", self.items_dispatched)?;
        writeln!(f, "items skipped:    {}", self.items_skipped)?;
        writeln!(f, "actions failed:   {}", self.actions_failed)?;
        writeln!(f, "retries:          {}", self.retries)?;
        write!(f, "abandoned tasks:  {}", self.abandoned)
    }
}
