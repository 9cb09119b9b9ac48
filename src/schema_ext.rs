//! OpenAPI stand-ins for foreign types. Models point at these with
//! `#[schema(value_type = ...)]`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// RFC 3339 timestamp, always UTC.
#[derive(Serialize, Deserialize, ToSchema)]
#[schema(value_type = String, format = "date-time", example = "2024-02-12T08:00:00Z")]
pub struct DateTimeWrapper(pub DateTime<Utc>);

/// User, actor or event id.
#[derive(Serialize, Deserialize, ToSchema)]
#[schema(value_type = String, format = "uuid", example = "123e4567-e89b-12d3-a456-426614174000")]
pub struct UuidWrapper(pub Uuid);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrappers_serialize_like_the_wrapped_type() {
        let id = Uuid::new_v4();
        assert_eq!(
            serde_json::to_string(&UuidWrapper(id)).unwrap(),
            serde_json::to_string(&id).unwrap()
        );

        let at = Utc::now();
        assert_eq!(
            serde_json::to_string(&DateTimeWrapper(at)).unwrap(),
            serde_json::to_string(&at).unwrap()
        );
    }
}
