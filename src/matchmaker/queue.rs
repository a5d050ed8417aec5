//! Search queue and the pool that keeps it in step with the rating index

use super::group::Group;
use super::index::RatingIndex;
use crate::types::{GroupId, Rating};
use std::collections::{HashMap, VecDeque};

/// FIFO of searching groups. The head is the next anchor.
#[derive(Debug, Default)]
pub struct SearchQueue {
    order: VecDeque<GroupId>,
    groups: HashMap<GroupId, Group>,
}

impl SearchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a group. Returns the group back if its ID is already queued.
    pub fn push_back(&mut self, group: Group) -> Result<(), Group> {
        if self.groups.contains_key(&group.id) {
            return Err(group);
        }
        self.order.push_back(group.id.clone());
        self.groups.insert(group.id.clone(), group);
        Ok(())
    }

    pub fn front(&self) -> Option<&GroupId> {
        self.order.front()
    }

    pub fn move_to_back(&mut self, group_id: &str) -> bool {
        match self.order.iter().position(|id| id == group_id) {
            Some(pos) => {
                if let Some(id) = self.order.remove(pos) {
                    self.order.push_back(id);
                }
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, group_id: &str) -> Option<Group> {
        let group = self.groups.remove(group_id)?;
        self.order.retain(|id| id != group_id);
        Some(group)
    }

    pub fn get(&self, group_id: &str) -> Option<&Group> {
        self.groups.get(group_id)
    }

    pub fn get_mut(&mut self, group_id: &str) -> Option<&mut Group> {
        self.groups.get_mut(group_id)
    }

    pub fn contains(&self, group_id: &str) -> bool {
        self.groups.contains_key(group_id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Groups in queue order
    pub fn iter(&self) -> impl Iterator<Item = &Group> {
        self.order.iter().filter_map(|id| self.groups.get(id))
    }
}

/// Queue plus rating index, mutated only together
#[derive(Debug, Default)]
pub struct SearchPool {
    queue: SearchQueue,
    index: RatingIndex,
}

impl SearchPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a group to the back of the queue and index it by average rating.
    /// A group with an ID already in search is handed back untouched.
    pub fn admit(&mut self, mut group: Group) -> Result<(), Group> {
        if self.queue.contains(&group.id) {
            return Err(group);
        }
        group.set_selected(false);
        group.mark_enqueued();

        let rating = group.avg_rating();
        let id = group.id.clone();
        self.queue.push_back(group)?;
        self.index.insert(rating, id);
        Ok(())
    }

    pub fn withdraw(&mut self, group_id: &str) -> Option<Group> {
        let group = self.queue.remove(group_id)?;
        self.index.remove(group.avg_rating(), group_id);
        Some(group)
    }

    pub fn move_to_back(&mut self, group_id: &str) -> bool {
        self.queue.move_to_back(group_id)
    }

    /// First unselected group no larger than `max_size`, probing
    /// `rating + d` then `rating - d` for `d` in `0..radius`.
    pub fn find_candidate(&self, rating: Rating, max_size: usize, radius: u32) -> Option<GroupId> {
        for offset in 0..radius {
            let offset = Rating::from(offset);
            let upper = rating.saturating_add(offset);
            if let Some(id) = self.eligible_in_bucket(upper, max_size) {
                return Some(id);
            }
            if offset == 0 {
                continue;
            }
            let lower = rating.saturating_sub(offset);
            if let Some(id) = self.eligible_in_bucket(lower, max_size) {
                return Some(id);
            }
        }
        None
    }

    fn eligible_in_bucket(&self, rating: Rating, max_size: usize) -> Option<GroupId> {
        self.index.lookup(rating)?.iter().find_map(|id| {
            self.queue
                .get(id)
                .filter(|g| !g.is_selected() && g.size() <= max_size)
                .map(|g| g.id.clone())
        })
    }

    pub fn front(&self) -> Option<&GroupId> {
        self.queue.front()
    }

    pub fn get(&self, group_id: &str) -> Option<&Group> {
        self.queue.get(group_id)
    }

    pub fn get_mut(&mut self, group_id: &str) -> Option<&mut Group> {
        self.queue.get_mut(group_id)
    }

    pub fn contains(&self, group_id: &str) -> bool {
        self.queue.contains(group_id)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn player_count(&self) -> usize {
        self.queue.iter().map(Group::size).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Group> {
        self.queue.iter()
    }

    /// Withdraw every group, in queue order
    pub fn drain(&mut self) -> Vec<Group> {
        let ids: Vec<GroupId> = self.queue.order.iter().cloned().collect();
        ids.iter().filter_map(|id| self.withdraw(id)).collect()
    }

    /// Queue and index hold exactly the same groups
    pub fn is_consistent(&self) -> bool {
        if self.queue.order.len() != self.queue.groups.len() || self.index.len() != self.queue.len() {
            return false;
        }
        let queued_in_index = self
            .queue
            .iter()
            .all(|g| self.index.contains(g.avg_rating(), &g.id));
        let indexed_in_queue = self.index.entries().all(|(rating, id)| {
            self.queue
                .get(id)
                .is_some_and(|g| g.avg_rating() == rating)
        });
        queued_in_index && indexed_in_queue
    }
}
