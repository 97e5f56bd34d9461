use std::collections::HashMap;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Form, Json,
};
use serde::Deserialize;

use jambox_collab::{MemberInfo, PeerId};

use crate::{auth::SessionId, context::ServerContext, errors::ServerResult, Router};

#[derive(Deserialize)]
struct NewSessionForm {
    cfg_username: String,
    #[serde(default)]
    room_id: Option<String>,
}

#[derive(Deserialize)]
struct JoinQuery {
    rid: String,
}

/// Issues a session token for someone about to create or join a room.
async fn open_session(
    State(context): State<ServerContext>,
    Form(form): Form<NewSessionForm>,
) -> ServerResult<String> {
    let room_id = form.room_id.filter(|id| !id.is_empty());
    let token = context.collab.open_session(&form.cfg_username, room_id)?;

    Ok(token)
}

async fn create_room(
    State(context): State<ServerContext>,
    SessionId(token): SessionId,
) -> ServerResult<String> {
    let room_id = context.collab.rooms.create_room(&token)?;

    Ok(room_id)
}

async fn join_room(
    State(context): State<ServerContext>,
    Query(query): Query<JoinQuery>,
) -> StatusCode {
    if context.collab.rooms.room_exists(&query.rid) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::FORBIDDEN
    }
}

async fn users(
    State(context): State<ServerContext>,
    SessionId(token): SessionId,
) -> ServerResult<Json<HashMap<PeerId, MemberInfo>>> {
    let users = context.collab.rooms.users(&token).await?;

    Ok(Json(users))
}

pub fn router() -> Router {
    Router::new()
        .route("/session", post(open_session))
        .route("/create", get(create_room))
        .route("/join", get(join_room))
        .route("/users", get(users))
}
