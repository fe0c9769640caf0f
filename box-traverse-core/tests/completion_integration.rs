mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use box_traverse_core::completion::CompletionTracker;
use box_traverse_core::config::RetrySettings;
use box_traverse_core::contract::PaginationStyle;
use box_traverse_core::dispatcher::ActionDispatcher;
use box_traverse_core::engine::TraversalEngine;
use box_traverse_core::enumerate::{Seed, UserTarget};
use box_traverse_core::fetcher::ItemFetcher;
use box_traverse_core::model::{UserProfile, ROOT_FOLDER_ID};
use box_traverse_core::policy::Policy;
use box_traverse_core::queue::{QueueOptions, RateLimitedQueue};
use box_traverse_core::registry::UserRegistry;
use box_traverse_core::stats::TraversalStats;
use box_traverse_core::users_queue::UsersTaskQueue;

use common::{client, file, folder, CollectingAction, CollectingRecorder, FakeAuth, Tree};

struct Run {
    registry: Arc<UserRegistry>,
    tracker: Arc<CompletionTracker>,
    users: UsersTaskQueue,
    stats: Arc<TraversalStats>,
}

fn wire(auth: FakeAuth, action: Arc<CollectingAction>, max_concurrent_users: usize) -> Run {
    let recorder = Arc::new(CollectingRecorder::default());
    let stats = Arc::new(TraversalStats::default());
    let dispatcher = ActionDispatcher::new(action, recorder.clone(), Arc::clone(&stats));
    let engine = TraversalEngine::new(
        ItemFetcher::new(vec![], 1000, PaginationStyle::Offset),
        Policy::default(),
        RetrySettings::default(),
        recorder.clone(),
        dispatcher,
        Arc::clone(&stats),
    );
    let registry = Arc::new(UserRegistry::new(QueueOptions::per_second(16)));
    let users_queue = RateLimitedQueue::new(QueueOptions::concurrency(max_concurrent_users));
    let tracker = CompletionTracker::new(Arc::clone(&registry), users_queue.clone());
    let users = UsersTaskQueue::new(
        users_queue,
        Arc::new(auth),
        Arc::clone(&registry),
        engine,
        Arc::clone(&tracker),
        recorder,
    );
    Run {
        registry,
        tracker,
        users,
        stats,
    }
}

fn root_target(user_id: &str) -> UserTarget {
    UserTarget {
        user_id: user_id.into(),
        seeds: vec![Seed::Folder {
            id: ROOT_FOLDER_ID.into(),
            follow: true,
        }],
    }
}

fn user_tree(owner: &str, files: usize) -> Arc<Tree> {
    let children = (0..files)
        .map(|i| file(&format!("{owner}-{i}"), owner))
        .collect();
    Arc::new(
        Tree::new()
            .with_folder(ROOT_FOLDER_ID, vec![folder(&format!("{owner}-sub"), owner)])
            .with_folder(&format!("{owner}-sub"), children),
    )
}

#[tokio::test(start_paused = true)]
async fn completion_fires_once_after_the_last_user_drains() {
    let mut auth = FakeAuth::new();
    let workloads = [("U1", 2), ("U2", 5), ("U3", 40)];
    for (id, files) in workloads {
        let profile = UserProfile::new(id, id, format!("{id}@example.com"));
        auth = auth.with_user(id, client(profile, user_tree(id, files)));
    }
    let action = Arc::new(CollectingAction::slow(Duration::from_millis(20)));
    let run = wire(auth, Arc::clone(&action), 2);

    let fired = Arc::new(AtomicUsize::new(0));
    let seen_at_completion = Arc::new(Mutex::new(None));
    {
        let fired = Arc::clone(&fired);
        let seen = Arc::clone(&seen_at_completion);
        let action = Arc::clone(&action);
        let registry = Arc::clone(&run.registry);
        run.tracker.on_complete(move || {
            fired.fetch_add(1, Ordering::SeqCst);
            *seen.lock().unwrap() = Some((action.count(), registry.all_drained()));
        });
    }

    for (id, _) in workloads {
        let _ = run.users.add_user_task(root_target(id));
    }
    run.tracker.seal();
    run.tracker.finished().await;

    // Every item (one subfolder plus its files per user) was acted on before completion.
    let expected = workloads.iter().map(|(_, files)| files + 1).sum::<usize>();
    assert_eq!(*seen_at_completion.lock().unwrap(), Some((expected, true)));
    assert!(run.registry.active_processing_users().is_empty());
    assert!(run.users.queue().is_idle());

    // Nothing re-fires later.
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(!run.tracker.check());
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(run.stats.snapshot().users_registered, 3);
}

#[tokio::test(start_paused = true)]
async fn same_user_from_two_targets_shares_one_queue() {
    let tree = Arc::new(
        Tree::new()
            .with_item(folder("100", "U1"))
            .with_item(folder("300", "U1"))
            .with_folder("100", vec![file("200", "U1")])
            .with_folder("300", vec![file("400", "U1")]),
    );
    let profile = UserProfile::new("U1", "Ann", "ann@example.com");
    let auth = FakeAuth::new().with_user("U1", client(profile, Arc::clone(&tree)));
    let action = Arc::new(CollectingAction::default());
    let run = wire(auth, Arc::clone(&action), 2);

    for folder_id in ["100", "300"] {
        let _ = run.users.add_user_task(UserTarget {
            user_id: "U1".into(),
            seeds: vec![Seed::Folder {
                id: folder_id.into(),
                follow: true,
            }],
        });
    }
    run.tracker.seal();
    run.tracker.finished().await;

    assert_eq!(run.registry.len(), 1);
    assert_eq!(run.stats.snapshot().users_registered, 1);
    assert_eq!(action.items(), vec!["100", "200", "300", "400"]);
}

#[tokio::test(start_paused = true)]
async fn empty_run_completes_immediately() {
    let run = wire(FakeAuth::new(), Arc::new(CollectingAction::default()), 1);
    run.tracker.seal();
    tokio::time::timeout(Duration::from_secs(1), run.tracker.finished())
        .await
        .expect("completion for a run without users");
    assert!(run.registry.is_empty());
}
