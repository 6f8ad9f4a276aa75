//! API route handlers

pub mod health;
pub mod settings;
pub mod sync;

use axum::{routing::get, Router};

use crate::state::AppState;

/// Build the application router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/health", get(health::health_check))
        .nest("/api/v1/sync", sync::router())
        .nest("/api/v1/settings", settings::router())
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use axum::{
        body::Body,
        http::{Request, StatusCode},
        Router,
    };
    use tower::ServiceExt;

    use crate::config::Config;
    use crate::feed::MemoryChangeFeed;
    use crate::log_sink::MemoryLogSink;
    use crate::prefs::MemoryPreferences;
    use crate::reconcile::{ReconciliationEngine, SourceRouter};
    use crate::scheduler::CycleRunner;
    use crate::state::AppState;

    pub struct TestApp {
        pub state: AppState,
        pub feed: MemoryChangeFeed,
        pub prefs: MemoryPreferences,
    }

    pub fn test_app() -> TestApp {
        let config = Config::default();
        let feed = MemoryChangeFeed::new();
        let prefs = MemoryPreferences::new();
        let engine = ReconciliationEngine::new(
            Arc::new(feed.clone()),
            Arc::new(prefs.clone()),
            Arc::new(MemoryLogSink::new()),
            SourceRouter::from_config(&config.sync),
        );
        let runner = Arc::new(CycleRunner::new(Arc::new(engine)));
        let state = AppState::new(config, None, runner, Arc::new(prefs.clone()));

        TestApp { state, feed, prefs }
    }

    pub async fn send(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    pub fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    pub fn json(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }
}
