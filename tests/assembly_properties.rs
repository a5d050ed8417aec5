//! Property tests for team assembly over random search pools

use lineup::matchmaker::{AssemblyError, Group, Player, SearchPool, TeamAssembler};
use lineup::types::PlayerId;
use proptest::prelude::*;

/// (group size, group average rating) pairs
fn pool_strategy(max_group_size: usize) -> impl Strategy<Value = Vec<(usize, i64)>> {
    prop::collection::vec((1..=max_group_size, 1400i64..1600), 0..40)
}

fn build_pool(layout: &[(usize, i64)]) -> SearchPool {
    let mut pool = SearchPool::new();
    let mut next_player: PlayerId = 1;
    for (i, &(size, rating)) in layout.iter().enumerate() {
        let players = (0..size)
            .map(|offset| Player::new(next_player + offset as PlayerId, rating))
            .collect();
        next_player += size as PlayerId;
        let (group, _ticket) = Group::new(format!("g{}", i), players).unwrap();
        pool.admit(group).unwrap();
    }
    pool
}

proptest! {
    #[test]
    fn assembled_matches_are_full_and_within_radius(
        layout in pool_strategy(3),
        team_size in 1usize..=4,
        team_count in 1usize..=3,
        radius in 1u32..60,
    ) {
        // Oversize groups never pass admission
        let layout: Vec<_> = layout
            .into_iter()
            .map(|(size, rating)| (size.min(team_size), rating))
            .collect();
        let mut pool = build_pool(&layout);
        let assembler = TeamAssembler::new(team_size, team_count, radius).unwrap();
        let total_players = pool.player_count();
        let mut matched_players = 0;
        let mut failures = 0;

        // Every group gets a turn as anchor before we give up
        while !pool.is_empty() && failures < pool.len() {
            match assembler.assemble(&mut pool) {
                Ok(teams) => {
                    failures = 0;
                    prop_assert_eq!(teams.len(), team_count);

                    let anchor_rating = teams[0].groups()[0].avg_rating();
                    for team in &teams {
                        prop_assert_eq!(team.num_players(), team_size);
                        for group in team.groups() {
                            let distance = (group.avg_rating() - anchor_rating).abs();
                            prop_assert!(distance < radius as i64);
                        }
                    }
                    matched_players += teams.iter().map(|t| t.num_players()).sum::<usize>();
                }
                Err(AssemblyError::NoCompatibleGroupFound { .. }) => failures += 1,
                Err(other) => prop_assert!(false, "unexpected assembly error {:?}", other),
            }

            prop_assert!(pool.is_consistent());
            prop_assert!(pool.iter().all(|group| !group.is_selected()));
        }

        prop_assert_eq!(matched_players + pool.player_count(), total_players);
    }

    #[test]
    fn withdrawing_keeps_pool_consistent(
        layout in pool_strategy(4),
        removals in prop::collection::vec(0usize..40, 0..20),
    ) {
        let mut pool = build_pool(&layout);
        let mut expected = layout.len();

        for index in removals {
            let group_id = format!("g{}", index);
            let present = pool.contains(&group_id);
            let withdrawn = pool.withdraw(&group_id);
            prop_assert_eq!(withdrawn.is_some(), present);
            if present {
                expected -= 1;
            }
            prop_assert_eq!(pool.len(), expected);
            prop_assert!(pool.is_consistent());
        }
    }
}
