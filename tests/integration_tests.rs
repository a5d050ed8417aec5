//! Integration tests for the lineup matchmaking service
//!
//! These tests drive a running matching engine through its handle:
//! - Complete search lifecycles, with and without readiness checks
//! - Readiness timeouts and penalties
//! - Allocator failures, timeouts and retry backoff
//! - Callers that leave while their match is being finalized
//! - Admission rejections and directory failures

mod fixtures;

use async_trait::async_trait;
use futures::future::join_all;
use lineup::error::Result;
use lineup::matchmaker::EngineSettings;
use lineup::types::{CancelReason, PlayerId, PlayerRecord, SearchOutcome};
use lineup::{MatchmakingError, PlayerDirectory};
use mockall::mock;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_test::{assert_err, assert_ok};

use fixtures::{
    directory, settings, FlakyAllocator, HangingDirectory, RecordingAllocator, SlowAllocator,
    TestEngine,
};

mock! {
    pub Directory {}

    #[async_trait]
    impl PlayerDirectory for Directory {
        async fn resolve(&self, ids: &[PlayerId], deadline: Instant) -> Result<Vec<PlayerRecord>>;
    }
}

fn error_of(err: &anyhow::Error) -> &MatchmakingError {
    err.downcast_ref::<MatchmakingError>()
        .expect("matchmaking error")
}

#[tokio::test]
async fn test_readiness_confirmed_match_shares_server() {
    let mut matchmaker = settings(2, 2, 50);
    matchmaker.check_readiness = true;
    matchmaker.seconds_to_accept_match = 5;

    let allocator = Arc::new(RecordingAllocator::new());
    let engine = TestEngine::spawn(
        matchmaker,
        directory(&[(1, 1500), (2, 1510), (3, 1520), (4, 1530)]),
        allocator.clone(),
    );

    let mut tickets = Vec::new();
    for (i, player) in (1..=4).enumerate() {
        let ticket = engine
            .handle
            .add_group(format!("group-{}", i), vec![player])
            .await
            .unwrap();
        tickets.push(ticket);
    }

    engine
        .wait_for(|stats| stats.players_awaiting_readiness == 4)
        .await;
    assert_eq!(allocator.request_count(), 0);

    for player in 1..=4 {
        assert!(engine.handle.set_player_ready(player).await.unwrap());
    }

    let mut servers = Vec::new();
    for ticket in tickets {
        let outcome = ticket.outcome().await;
        assert!(outcome.is_match(), "unexpected outcome {:?}", outcome);
        servers.push(outcome.server_id().map(str::to_string));
    }
    assert!(servers.windows(2).all(|pair| pair[0] == pair[1]));

    let requests = allocator.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].destination, "test-destination");
    assert_eq!(requests[0].rosters.len(), 2);
    assert!(requests[0].rosters.iter().all(|r| r.player_count() == 2));

    engine
        .wait_for(|stats| stats.matches_completed == 1 && stats.players_awaiting_readiness == 0)
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_readiness_timeout_penalizes_unready_player() {
    let mut matchmaker = settings(1, 2, 50);
    matchmaker.check_readiness = true;
    matchmaker.seconds_to_accept_match = 10;
    matchmaker.penalty_for_unaccepted_match = true;
    matchmaker.penalty_seconds = 60;

    let allocator = Arc::new(RecordingAllocator::new());
    let engine = TestEngine::spawn(
        matchmaker,
        directory(&[(1, 1500), (2, 1500), (3, 1500)]),
        allocator.clone(),
    );

    let mut ready = engine.handle.add_group("ready", vec![1]).await.unwrap();
    let idle = engine.handle.add_group("idle", vec![2]).await.unwrap();

    engine
        .wait_for(|stats| stats.players_awaiting_readiness == 2)
        .await;
    assert!(engine.handle.set_player_ready(1).await.unwrap());

    assert_eq!(
        idle.outcome().await,
        SearchOutcome::Cancelled {
            reason: CancelReason::NotReady
        }
    );
    engine
        .wait_for(|stats| stats.penalized_players == 1 && stats.groups_searching == 1)
        .await;
    assert!(ready.try_outcome().is_none());
    assert_eq!(allocator.request_count(), 0);

    // Thirty seconds into the penalty
    tokio::time::advance(Duration::from_secs(30)).await;
    let err = engine
        .handle
        .add_group("idle-again", vec![2])
        .await
        .unwrap_err();
    assert!(matches!(
        error_of(&err),
        MatchmakingError::PlayerPenalized { player_id: 2, .. }
    ));

    tokio::time::advance(Duration::from_secs(31)).await;
    assert_eq!(engine.handle.stats().await.unwrap().penalized_players, 0);
    assert!(engine.handle.add_group("idle-again", vec![2]).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_readiness_timeout_requeues_confirmed_groups() {
    let mut matchmaker = settings(2, 2, 50);
    matchmaker.check_readiness = true;
    matchmaker.seconds_to_accept_match = 10;
    matchmaker.penalty_for_unaccepted_match = true;

    let allocator = Arc::new(RecordingAllocator::new());
    let engine = TestEngine::spawn(
        matchmaker,
        directory(&[(1, 1500), (2, 1500), (3, 1500), (4, 1500)]),
        allocator.clone(),
    );

    let mut tickets = Vec::new();
    for player in 1..=4 {
        tickets.push(
            engine
                .handle
                .add_group(format!("g{}", player), vec![player])
                .await
                .unwrap(),
        );
    }

    engine
        .wait_for(|stats| stats.players_awaiting_readiness == 4)
        .await;
    for player in 1..=3 {
        assert!(engine.handle.set_player_ready(player).await.unwrap());
    }

    let unready = tickets.pop().unwrap();
    assert_eq!(unready.group_id(), "g4");
    assert_eq!(
        unready.outcome().await,
        SearchOutcome::Cancelled {
            reason: CancelReason::NotReady
        }
    );

    // Three players cannot fill a 2v2, so the confirmed groups keep searching
    engine
        .wait_for(|stats| {
            stats.groups_searching == 3
                && stats.players_awaiting_readiness == 0
                && stats.penalized_players == 1
        })
        .await;
    for ticket in &mut tickets {
        assert!(ticket.try_outcome().is_none());
    }
    assert_eq!(allocator.request_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_readiness_routes_dropped_before_allocation() {
    let mut matchmaker = settings(1, 2, 50);
    matchmaker.check_readiness = true;

    let engine = TestEngine::spawn(
        matchmaker,
        directory(&[(1, 1500), (2, 1500)]),
        Arc::new(SlowAllocator {
            delay: Duration::from_secs(5),
        }),
    );

    let first = engine.handle.add_group("a", vec![1]).await.unwrap();
    let second = engine.handle.add_group("b", vec![2]).await.unwrap();

    engine
        .wait_for(|stats| stats.players_awaiting_readiness == 2)
        .await;
    for player in [1, 2] {
        assert!(engine.handle.set_player_ready(player).await.unwrap());
    }

    // Still allocating, but nobody is waiting on confirmations anymore
    engine
        .wait_for(|stats| stats.players_awaiting_readiness == 0 && stats.matches_in_progress == 1)
        .await;
    assert!(!engine.handle.set_player_ready(1).await.unwrap());

    assert_eq!(first.outcome().await.server_id(), Some("slow-server"));
    assert_eq!(second.outcome().await.server_id(), Some("slow-server"));
}

#[tokio::test]
async fn test_allocation_failure_requeues_groups() {
    let allocator = Arc::new(FlakyAllocator::failing(1));
    let engine = TestEngine::spawn(
        settings(1, 2, 10),
        directory(&[(1, 1500), (2, 1505)]),
        allocator.clone(),
    );

    let first = engine.handle.add_group("a", vec![1]).await.unwrap();
    let second = engine.handle.add_group("b", vec![2]).await.unwrap();

    let first = first.outcome().await;
    let second = second.outcome().await;
    assert_eq!(first.server_id(), Some("server-after-2-calls"));
    assert_eq!(first.server_id(), second.server_id());
    assert_eq!(allocator.calls(), 2);

    engine
        .wait_for(|stats| stats.matches_started == 2 && stats.matches_completed == 1)
        .await;
}

#[tokio::test]
async fn test_allocation_failure_cancels_without_requeue() {
    let mut matchmaker = settings(1, 2, 10);
    matchmaker.requeue_on_allocation_failure = false;

    let engine = TestEngine::spawn(
        matchmaker,
        directory(&[(1, 1500), (2, 1505)]),
        Arc::new(FlakyAllocator::always_failing()),
    );

    let first = engine.handle.add_group("a", vec![1]).await.unwrap();
    let second = engine.handle.add_group("b", vec![2]).await.unwrap();

    for ticket in [first, second] {
        assert_eq!(
            ticket.outcome().await,
            SearchOutcome::Cancelled {
                reason: CancelReason::AllocationFailed
            }
        );
    }

    engine
        .wait_for(|stats| stats.groups_cancelled == 2 && stats.matches_in_progress == 0)
        .await;
    let stats = engine.handle.stats().await.unwrap();
    assert_eq!(stats.groups_searching, 0);
    assert_eq!(stats.matches_completed, 0);
}

#[tokio::test(start_paused = true)]
async fn test_allocator_timeout_counts_as_failure() {
    let mut matchmaker = settings(1, 2, 10);
    matchmaker.requeue_on_allocation_failure = false;
    let engine_settings = EngineSettings {
        matchmaker,
        allocator_timeout: Duration::from_secs(1),
        ..EngineSettings::default()
    };

    let engine = TestEngine::spawn_with(
        engine_settings,
        directory(&[(1, 1500), (2, 1500)]),
        Arc::new(SlowAllocator {
            delay: Duration::from_secs(30),
        }),
    );

    let ticket = engine.handle.add_group("a", vec![1]).await.unwrap();
    let _other = engine.handle.add_group("b", vec![2]).await.unwrap();

    assert_eq!(
        ticket.outcome().await,
        SearchOutcome::Cancelled {
            reason: CancelReason::AllocationFailed
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_failing_allocator_is_retried_with_backoff() {
    let engine_settings = EngineSettings {
        matchmaker: settings(1, 2, 10),
        allocation_backoff: Duration::from_millis(100),
        max_allocation_backoff: Duration::from_secs(10),
        ..EngineSettings::default()
    };
    let allocator = Arc::new(FlakyAllocator::always_failing());
    let engine = TestEngine::spawn_with(
        engine_settings,
        directory(&[(1, 1500), (2, 1505)]),
        allocator.clone(),
    );

    let mut first = engine.handle.add_group("a", vec![1]).await.unwrap();
    let mut second = engine.handle.add_group("b", vec![2]).await.unwrap();

    // Attempts at 0, 100, 300 and 700 ms; the next one is due at 1500 ms
    tokio::time::sleep(Duration::from_secs(1)).await;
    let calls = allocator.calls();
    assert!((2..=4).contains(&calls), "allocator called {} times", calls);

    assert!(first.try_outcome().is_none());
    assert!(second.try_outcome().is_none());
    let stats = engine.handle.stats().await.unwrap();
    assert_eq!(stats.groups_searching, 2);
    assert_eq!(stats.matches_completed, 0);
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_group_not_requeued_after_allocation_failure() {
    let allocator =
        Arc::new(FlakyAllocator::failing(1).with_delay(Duration::from_millis(100)));
    let engine = TestEngine::spawn(
        settings(1, 2, 10),
        directory(&[(1, 1500), (2, 1500), (3, 1500)]),
        allocator.clone(),
    );

    let abandoned = engine.handle.add_group("a", vec![1]).await.unwrap();
    let kept = engine.handle.add_group("b", vec![2]).await.unwrap();
    engine
        .wait_for(|stats| stats.matches_in_progress == 1)
        .await;

    // The caller of "a" leaves while its match is being allocated
    assert!(!engine.handle.remove_group("a").await.unwrap());
    drop(abandoned);

    let late = engine.handle.add_group("c", vec![3]).await.unwrap();
    let kept = kept.outcome().await;
    assert_eq!(kept.server_id(), Some("server-after-2-calls"));
    assert_eq!(late.outcome().await.server_id(), kept.server_id());

    engine
        .wait_for(|stats| {
            stats.groups_cancelled == 1
                && stats.groups_searching == 0
                && stats.matches_in_progress == 0
        })
        .await;
    assert_eq!(allocator.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_match_with_abandoned_group_is_not_allocated() {
    let mut matchmaker = settings(1, 2, 10);
    matchmaker.check_readiness = true;

    let allocator = Arc::new(RecordingAllocator::new());
    let engine = TestEngine::spawn(
        matchmaker,
        directory(&[(1, 1500), (2, 1500)]),
        allocator.clone(),
    );

    let mut kept = engine.handle.add_group("a", vec![1]).await.unwrap();
    let abandoned = engine.handle.add_group("b", vec![2]).await.unwrap();
    engine
        .wait_for(|stats| stats.players_awaiting_readiness == 2)
        .await;

    drop(abandoned);
    for player in [1, 2] {
        assert!(engine.handle.set_player_ready(player).await.unwrap());
    }

    engine
        .wait_for(|stats| stats.matches_in_progress == 0 && stats.groups_searching == 1)
        .await;
    assert_eq!(allocator.request_count(), 0);
    assert_eq!(engine.handle.stats().await.unwrap().groups_cancelled, 1);
    assert!(kept.try_outcome().is_none());
}

#[tokio::test]
async fn test_duplicate_and_oversize_groups_rejected() {
    let engine = TestEngine::spawn(
        settings(2, 2, 10),
        directory(&[(1, 1500), (2, 1500), (3, 1500), (4, 1500), (5, 1500)]),
        Arc::new(RecordingAllocator::new()),
    );

    let _searching = engine.handle.add_group("g", vec![1]).await.unwrap();

    let err = engine.handle.add_group("g", vec![2]).await.unwrap_err();
    assert!(matches!(
        error_of(&err),
        MatchmakingError::DuplicateGroup { group_id } if group_id == "g"
    ));

    let err = engine
        .handle
        .add_group("big", vec![3, 4, 5])
        .await
        .unwrap_err();
    assert!(matches!(
        error_of(&err),
        MatchmakingError::GroupTooLarge {
            size: 3,
            team_size: 2,
            ..
        }
    ));

    let err = engine.handle.add_group("twice", vec![3, 3]).await.unwrap_err();
    assert!(matches!(error_of(&err), MatchmakingError::InvalidGroup { .. }));

    let stats = engine.handle.stats().await.unwrap();
    assert_eq!(stats.groups_searching, 1);
    assert_eq!(stats.players_searching, 1);
}

#[tokio::test(start_paused = true)]
async fn test_group_in_flight_is_still_a_duplicate() {
    let engine = TestEngine::spawn(
        settings(1, 2, 10),
        directory(&[(1, 1500), (2, 1500), (3, 1500)]),
        Arc::new(SlowAllocator {
            delay: Duration::from_secs(5),
        }),
    );

    let ticket = engine.handle.add_group("a", vec![1]).await.unwrap();
    let _other = engine.handle.add_group("b", vec![2]).await.unwrap();
    engine
        .wait_for(|stats| stats.matches_in_progress == 1)
        .await;

    let err = engine.handle.add_group("a", vec![3]).await.unwrap_err();
    assert!(matches!(error_of(&err), MatchmakingError::DuplicateGroup { .. }));

    // Withdrawal only applies to searching groups
    assert!(!engine.handle.remove_group("a").await.unwrap());
    assert_eq!(ticket.outcome().await.server_id(), Some("slow-server"));
}

#[tokio::test]
async fn test_remove_group_leaves_others_searching() {
    let engine = TestEngine::spawn(
        settings(1, 2, 10),
        directory(&[(1, 1000), (2, 2000)]),
        Arc::new(RecordingAllocator::new()),
    );

    let removed = engine.handle.add_group("low", vec![1]).await.unwrap();
    let mut kept = engine.handle.add_group("high", vec![2]).await.unwrap();

    assert!(assert_ok!(engine.handle.remove_group("low").await));
    assert_eq!(
        removed.outcome().await,
        SearchOutcome::Cancelled {
            reason: CancelReason::Removed
        }
    );

    let stats = engine.handle.stats().await.unwrap();
    assert_eq!(stats.groups_searching, 1);
    assert_eq!(stats.groups_cancelled, 1);
    assert!(kept.try_outcome().is_none());
}

#[tokio::test]
async fn test_search_radius_bounds_matching() {
    let allocator = Arc::new(RecordingAllocator::new());
    let engine = TestEngine::spawn(
        settings(1, 2, 50),
        directory(&[(1, 1500), (2, 1600), (3, 1549)]),
        allocator.clone(),
    );

    let low = engine.handle.add_group("low", vec![1]).await.unwrap();
    let mut high = engine.handle.add_group("high", vec![2]).await.unwrap();

    // 100 apart, never within reach of each other
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(allocator.request_count(), 0);

    let near = engine.handle.add_group("near", vec![3]).await.unwrap();
    let low = low.outcome().await;
    assert!(low.is_match());
    assert_eq!(low.server_id(), near.outcome().await.server_id());

    assert!(high.try_outcome().is_none());
    assert_eq!(engine.handle.stats().await.unwrap().groups_searching, 1);
}

#[tokio::test]
async fn test_mixed_group_sizes_fill_teams() {
    let ratings: Vec<(PlayerId, i64)> = (1..=11).map(|id| (id, 1500)).collect();
    let allocator = Arc::new(RecordingAllocator::new());
    let engine = TestEngine::spawn(settings(5, 2, 10), directory(&ratings), allocator.clone());

    let tickets = vec![
        engine.handle.add_group("trio-a", vec![1, 2, 3]).await.unwrap(),
        engine.handle.add_group("duo-a", vec![4, 5]).await.unwrap(),
        engine.handle.add_group("trio-b", vec![6, 7, 8]).await.unwrap(),
        engine.handle.add_group("duo-b", vec![9, 10]).await.unwrap(),
    ];
    let mut solo = engine.handle.add_group("solo", vec![11]).await.unwrap();

    let outcomes = join_all(tickets.into_iter().map(|t| t.outcome())).await;
    assert!(outcomes.iter().all(SearchOutcome::is_match));
    assert!(solo.try_outcome().is_none());

    let requests = allocator.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].rosters.iter().all(|r| r.player_count() == 5));

    let stats = engine.handle.stats().await.unwrap();
    assert_eq!(stats.groups_searching, 1);
    assert_eq!(stats.players_searching, 1);
}

#[tokio::test]
async fn test_directory_failure_rejects_group() {
    let mut mock = MockDirectory::new();
    mock.expect_resolve()
        .times(1)
        .returning(|_, _| Err(anyhow::anyhow!("directory offline")));

    let engine = TestEngine::spawn(
        settings(1, 2, 10),
        Arc::new(mock),
        Arc::new(RecordingAllocator::new()),
    );

    let err = engine.handle.add_group("g", vec![1]).await.unwrap_err();
    match error_of(&err) {
        MatchmakingError::DirectoryLookupFailed { reason } => {
            assert!(reason.contains("directory offline"))
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(engine.handle.stats().await.unwrap().groups_searching, 0);
}

#[tokio::test]
async fn test_directory_answer_out_of_order_rejected() {
    let mut mock = MockDirectory::new();
    mock.expect_resolve().returning(|ids, _| {
        Ok(ids
            .iter()
            .rev()
            .map(|&id| PlayerRecord::new(id, 1500))
            .collect())
    });

    let engine = TestEngine::spawn(
        settings(2, 2, 10),
        Arc::new(mock),
        Arc::new(RecordingAllocator::new()),
    );

    let err = engine.handle.add_group("g", vec![1, 2]).await.unwrap_err();
    assert!(matches!(
        error_of(&err),
        MatchmakingError::DirectoryLookupFailed { .. }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_directory_deadline_enforced() {
    let engine_settings = EngineSettings {
        matchmaker: settings(1, 2, 10),
        directory_timeout: Duration::from_millis(100),
        ..EngineSettings::default()
    };
    let engine = TestEngine::spawn_with(
        engine_settings,
        Arc::new(HangingDirectory),
        Arc::new(RecordingAllocator::new()),
    );

    let err = engine.handle.add_group("g", vec![1]).await.unwrap_err();
    assert!(matches!(
        error_of(&err),
        MatchmakingError::DirectoryLookupFailed { .. }
    ));
}

#[tokio::test]
async fn test_shutdown_resolves_every_ticket() {
    let engine = TestEngine::spawn(
        settings(2, 2, 10),
        directory(&[(1, 1000), (2, 2000), (3, 3000)]),
        Arc::new(RecordingAllocator::new()),
    );

    let mut tickets = Vec::new();
    for player in 1..=3 {
        tickets.push(
            engine
                .handle
                .add_group(format!("g{}", player), vec![player])
                .await
                .unwrap(),
        );
    }

    engine.handle.shutdown().await.unwrap();
    engine.task.await.unwrap();

    for ticket in tickets {
        assert_eq!(
            ticket.outcome().await,
            SearchOutcome::Cancelled {
                reason: CancelReason::EngineStopped
            }
        );
    }

    let err = assert_err!(engine.handle.add_group("late", vec![1]).await);
    assert!(matches!(error_of(&err), MatchmakingError::EngineUnavailable));
}
