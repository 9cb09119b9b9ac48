use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::ops::Bound;
use uuid::Uuid;

use super::{FollowerPage, GraphError, SocialGraph};

#[derive(Debug, Default)]
struct GraphState {
    /// user id -> active flag
    users: HashMap<Uuid, bool>,
    /// followee -> followers
    followers: HashMap<Uuid, BTreeSet<Uuid>>,
}

/// Follow graph held in memory, for local runs and tests.
#[derive(Debug, Default)]
pub struct MemoryGraph {
    state: RwLock<GraphState>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, user_id: Uuid) {
        self.state.write().users.entry(user_id).or_insert(true);
    }

    /// Deactivated users drop out of follower pages and `user_exists`.
    pub fn deactivate_user(&self, user_id: Uuid) {
        if let Some(active) = self.state.write().users.get_mut(&user_id) {
            *active = false;
        }
    }

    pub fn follow(&self, follower: Uuid, followee: Uuid) {
        let mut state = self.state.write();
        state.users.entry(follower).or_insert(true);
        state.users.entry(followee).or_insert(true);
        state.followers.entry(followee).or_default().insert(follower);
    }
}

#[async_trait]
impl SocialGraph for MemoryGraph {
    async fn followers(
        &self,
        user_id: Uuid,
        cursor: Option<Uuid>,
        limit: usize,
    ) -> Result<FollowerPage, GraphError> {
        let state = self.state.read();
        let Some(all) = state.followers.get(&user_id) else {
            return Ok(FollowerPage::default());
        };

        let lower = cursor.map_or(Bound::Unbounded, Bound::Excluded);
        let mut active = all
            .range((lower, Bound::Unbounded))
            .filter(|id| state.users.get(id).copied().unwrap_or(false));

        let followers: Vec<Uuid> = active.by_ref().take(limit).copied().collect();
        let next_cursor = if followers.len() == limit && active.next().is_some() {
            followers.last().copied()
        } else {
            None
        };

        Ok(FollowerPage {
            followers,
            next_cursor,
        })
    }

    async fn user_exists(&self, user_id: Uuid) -> Result<bool, GraphError> {
        Ok(self
            .state
            .read()
            .users
            .get(&user_id)
            .copied()
            .unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_followers_paginate_with_cursor() {
        let graph = MemoryGraph::new();
        let author = Uuid::new_v4();
        for _ in 0..5 {
            graph.follow(Uuid::new_v4(), author);
        }

        let first = graph.followers(author, None, 2).await.unwrap();
        assert_eq!(first.followers.len(), 2);
        let second = graph.followers(author, first.next_cursor, 2).await.unwrap();
        let third = graph.followers(author, second.next_cursor, 2).await.unwrap();
        assert_eq!(third.followers.len(), 1);
        assert!(third.next_cursor.is_none());

        let mut seen: Vec<Uuid> = [first.followers, second.followers, third.followers].concat();
        seen.dedup();
        assert_eq!(seen.len(), 5);
    }

    #[tokio::test]
    async fn test_deactivated_users_are_hidden() {
        let graph = MemoryGraph::new();
        let (author, fan) = (Uuid::new_v4(), Uuid::new_v4());
        graph.follow(fan, author);
        graph.deactivate_user(fan);

        assert!(graph.followers(author, None, 10).await.unwrap().followers.is_empty());
        assert!(!graph.user_exists(fan).await.unwrap());
        assert!(!graph.user_exists(Uuid::new_v4()).await.unwrap());
    }
}
