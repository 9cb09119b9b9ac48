pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Social graph unavailable: {0}")]
    Unavailable(String),
}

/// One page of followers, ordered by follower id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FollowerPage {
    pub followers: Vec<Uuid>,
    /// Pass back as `cursor` to fetch the next page; `None` on the last page.
    pub next_cursor: Option<Uuid>,
}

/// Read side of the follow graph. The graph's own CRUD lives elsewhere.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SocialGraph: Send + Sync {
    /// Active followers of `user_id` with ids strictly greater than `cursor`.
    async fn followers(
        &self,
        user_id: Uuid,
        cursor: Option<Uuid>,
        limit: usize,
    ) -> Result<FollowerPage, GraphError>;

    async fn user_exists(&self, user_id: Uuid) -> Result<bool, GraphError>;
}
