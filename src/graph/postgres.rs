use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::{FollowerPage, GraphError, SocialGraph};

/// Reads `global.follows` joined with `global.users`.
#[derive(Debug, Clone)]
pub struct PgSocialGraph {
    pool: PgPool,
}

impl PgSocialGraph {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SocialGraph for PgSocialGraph {
    async fn followers(
        &self,
        user_id: Uuid,
        cursor: Option<Uuid>,
        limit: usize,
    ) -> Result<FollowerPage, GraphError> {
        // One extra row tells us whether another page exists.
        let rows = sqlx::query(
            "SELECT f.follower_id
             FROM global.follows f
             JOIN global.users u ON u.id = f.follower_id
             WHERE f.followee_id = $1
               AND u.is_active = true
               AND ($2::uuid IS NULL OR f.follower_id > $2)
             ORDER BY f.follower_id
             LIMIT $3",
        )
        .bind(user_id)
        .bind(cursor)
        .bind(limit as i64 + 1)
        .fetch_all(&self.pool)
        .await?;

        let mut followers = rows
            .iter()
            .map(|row| row.try_get::<Uuid, _>("follower_id"))
            .collect::<Result<Vec<_>, _>>()?;

        let next_cursor = if followers.len() > limit {
            followers.truncate(limit);
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
        let exists: bool = sqlx::query(
            "SELECT EXISTS(SELECT 1 FROM global.users WHERE id = $1 AND is_active = true)",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?
        .try_get(0)?;
        Ok(exists)
    }
}
