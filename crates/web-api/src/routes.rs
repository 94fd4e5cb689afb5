use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::websocket;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/ws", get(websocket::handle_upgrade))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use application::collaborators::auth::memory::StaticTokenVerifier;
    use application::collaborators::membership::memory::MemoryMembershipAuthority;
    use application::collaborators::persistence::memory::MemoryMessagePersistence;
    use application::{
        ConnectionDeps, FanoutRouter, FixedWindowRateLimiter, MessageService,
        MessageServiceDependencies, PresenceTracker, SessionRegistry, SystemClock,
        TypingIndicatorStore,
    };
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use config::AppConfig;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        let config = AppConfig::from_env_with_defaults();
        let membership = Arc::new(MemoryMembershipAuthority::new());
        let persistence = Arc::new(MemoryMessagePersistence::new());
        let registry = Arc::new(SessionRegistry::new());
        let router = Arc::new(FanoutRouter::new(registry.clone()));
        let messages = Arc::new(MessageService::new(MessageServiceDependencies {
            limiter: Arc::new(FixedWindowRateLimiter::new()),
            membership: membership.clone(),
            persistence,
            router: router.clone(),
            limits: config.rate_limit.clone(),
        }));
        let deps = Arc::new(ConnectionDeps {
            verifier: Arc::new(StaticTokenVerifier::new()),
            membership,
            registry,
            presence: Arc::new(PresenceTracker::new(Arc::new(SystemClock))),
            typing: Arc::new(TypingIndicatorStore::new(Duration::from_secs(5))),
            router,
            messages,
            clock: Arc::new(SystemClock),
        });
        AppState::new(deps, &config)
    }

    #[tokio::test]
    async fn healthz_returns_ok() {
        let app = router(test_state());
        let response = app
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn ws_route_requires_upgrade() {
        let app = router(test_state());
        // 普通 GET 请求（无升级头）不被接受
        let response = app
            .oneshot(Request::builder().uri("/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_ne!(response.status(), StatusCode::OK);
    }
}
