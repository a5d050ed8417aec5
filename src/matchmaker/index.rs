//! Rating buckets for radius search
//!
//! Maps an exact average rating to the searching groups that carry it, in
//! insertion order. Buckets that become empty are dropped so the map size
//! tracks the number of distinct ratings in search.

use crate::types::{GroupId, Rating};
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct RatingIndex {
    buckets: HashMap<Rating, Vec<GroupId>>,
    len: usize,
}

impl RatingIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, rating: Rating, group_id: GroupId) {
        self.buckets.entry(rating).or_default().push(group_id);
        self.len += 1;
    }

    /// Remove one group from its bucket. Returns false if it was not there.
    pub fn remove(&mut self, rating: Rating, group_id: &str) -> bool {
        let Some(bucket) = self.buckets.get_mut(&rating) else {
            return false;
        };
        let Some(pos) = bucket.iter().position(|id| id == group_id) else {
            return false;
        };

        bucket.remove(pos);
        if bucket.is_empty() {
            self.buckets.remove(&rating);
        }
        self.len -= 1;
        true
    }

    /// Groups at exactly this rating
    pub fn lookup(&self, rating: Rating) -> Option<&[GroupId]> {
        self.buckets.get(&rating).map(Vec::as_slice)
    }

    pub fn contains(&self, rating: Rating, group_id: &str) -> bool {
        self.lookup(rating)
            .is_some_and(|bucket| bucket.iter().any(|id| id == group_id))
    }

    /// Number of indexed groups
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Every (rating, group) pair, in no particular order
    pub fn entries(&self) -> impl Iterator<Item = (Rating, &GroupId)> {
        self.buckets
            .iter()
            .flat_map(|(rating, ids)| ids.iter().map(move |id| (*rating, id)))
    }
}
