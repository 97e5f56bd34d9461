use axum::{
    async_trait,
    extract::{FromRequestParts, Query},
    http::{request::Parts, StatusCode},
};
use serde::Deserialize;

use crate::ServerContext;

#[derive(Deserialize)]
struct SessionQuery {
    sid: String,
}

/// The session token a request was made with, passed as the `sid` query parameter.
pub struct SessionId(pub String);

#[async_trait]
impl FromRequestParts<ServerContext> for SessionId {
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &ServerContext,
    ) -> Result<Self, Self::Rejection> {
        let Query(query) = Query::<SessionQuery>::from_request_parts(parts, state)
            .await
            .map_err(|_| (StatusCode::FORBIDDEN, "Missing session"))?;

        if query.sid.is_empty() {
            return Err((StatusCode::FORBIDDEN, "Missing session"));
        }

        Ok(Self(query.sid))
    }
}
