use axum::{
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use refundgate_core::Actor;

use crate::context::ActorContext;

/// Header carrying the verified caller identity.
///
/// Authentication happens upstream; the gateway forwards who it verified in
/// this header. The engine only insists that it is present and non-blank so
/// no transition is ever recorded against an empty actor.
pub const ACTOR_HEADER: &str = "x-actor";

pub async fn actor_middleware(
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let actor = extract_actor(req.headers())?;

    req.extensions_mut().insert(ActorContext::new(actor));

    Ok(next.run(req).await)
}

fn extract_actor(headers: &HeaderMap) -> Result<Actor, StatusCode> {
    let header = headers.get(ACTOR_HEADER).ok_or(StatusCode::UNAUTHORIZED)?;

    let value = header.to_str().map_err(|_| StatusCode::UNAUTHORIZED)?;

    Actor::new(value).map_err(|_| StatusCode::UNAUTHORIZED)
}
