use axum::{http::StatusCode, response::IntoResponse, Json};

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn whoami(
    axum::extract::Extension(actor): axum::extract::Extension<crate::context::ActorContext>,
) -> impl IntoResponse {
    Json(serde_json::json!({
        "actor": actor.actor().as_str(),
    }))
}
