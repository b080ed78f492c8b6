use axum::{routing::get, Router};

pub mod hardware;
pub mod projects;
pub mod system;

/// Router for all authenticated endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .nest("/hardware", hardware::router())
        .nest("/projects", projects::router())
}
