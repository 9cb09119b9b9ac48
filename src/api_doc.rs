use utoipa::openapi::security::{Http, HttpAuthScheme, SecurityScheme};
use utoipa::{Modify, OpenApi};

/// Security scheme configuration for OpenAPI
pub struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
        );
    }
}

/// API documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Social Notify API",
        version = "0.1.0",
        description = "Notification fan-out, delivery, digests and trending hashtags"
    ),
    paths(
        crate::routes::health::health_check,
        crate::routes::health::protected_health_check,
        // Ingestion
        crate::event::controller::submit_event,
        // Inbox
        crate::notification::controller::list_notifications,
        crate::notification::controller::unread_count,
        crate::notification::controller::mark_read,
        crate::notification::controller::mark_all_read,
        // Preferences and push subscriptions
        crate::preference::controller::get_preferences,
        crate::preference::controller::update_preferences,
        crate::preference::controller::subscribe_push,
        crate::preference::controller::unsubscribe_push,
        // Trending
        crate::trending::controller::get_trending,
        // Admin
        crate::jobs::controller::run_digest,
        crate::jobs::controller::sweep_trending,
        crate::jobs::controller::run_cleanup
    ),
    components(
        schemas(
            crate::controller::ErrorResponse,
            crate::routes::health::HealthResponse,
            crate::event::model::EventType,
            crate::event::model::SubmitEventRequest,
            crate::event::model::SubmitEventResponse,
            crate::notification::model::Channel,
            crate::notification::model::ReadState,
            crate::notification::model::NotificationRecord,
            crate::notification::model::NotificationListResponse,
            crate::notification::model::UnreadCountResponse,
            crate::notification::model::MarkAllReadResponse,
            crate::notification::model::CleanupReport,
            crate::preference::model::DigestFrequency,
            crate::preference::model::Preference,
            crate::preference::model::PreferenceUpdate,
            crate::preference::model::UpdatePreferencesRequest,
            crate::preference::model::PreferencesResponse,
            crate::delivery::model::PushKeys,
            crate::delivery::model::SubscribePushRequest,
            crate::delivery::model::UnsubscribePushRequest,
            crate::delivery::model::PushSubscriptionResponse,
            crate::digest::model::DigestRunReport,
            crate::trending::model::TrendingCounter,
            crate::trending::model::TrendingResponse,
            crate::trending::model::SweepReport,
            // External type schemas
            crate::schema_ext::DateTimeWrapper,
            crate::schema_ext::UuidWrapper
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "events", description = "Social event ingestion"),
        (name = "notifications", description = "Notification inbox"),
        (name = "preferences", description = "Per event type channel preferences and push subscriptions"),
        (name = "trending", description = "Trending hashtags"),
        (name = "admin", description = "Maintenance jobs, admin role required")
    ),
    security(
        ("bearer_auth" = [])
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_lists_public_surface() {
        let doc = ApiDoc::openapi();
        for path in [
            "/api/events",
            "/api/notifications",
            "/api/notifications/{id}/read",
            "/api/notifications/preferences",
            "/api/trending",
            "/api/admin/digests/{frequency}/run",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {}", path);
        }
    }
}
