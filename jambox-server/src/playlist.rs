use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Form, Json,
};
use serde::Deserialize;

use jambox_collab::QueueAction;
use jambox_core::{Submission, Track};

use crate::{
    auth::SessionId,
    context::ServerContext,
    errors::{ServerError, ServerResult},
    Router,
};

#[derive(Deserialize)]
struct EnqueueForm {
    post_url: String,
}

async fn playlist(
    State(context): State<ServerContext>,
    SessionId(token): SessionId,
) -> ServerResult<Json<Vec<Track>>> {
    let tracks = context.collab.rooms.playlist(&token)?;

    Ok(Json(tracks))
}

/// Accepts a track request. The response carries the id the requester
/// will see again in the status message once the track is resolved.
async fn enqueue(
    State(context): State<ServerContext>,
    SessionId(token): SessionId,
    Form(form): Form<EnqueueForm>,
) -> ServerResult<(StatusCode, String)> {
    match context.collab.rooms.request_track(&token, &form.post_url)? {
        Submission::Accepted(task_id) => Ok((StatusCode::ACCEPTED, task_id.to_string())),
        Submission::Rejected => Err(ServerError::TooManyRequests),
        Submission::TimedOut => Err(ServerError::Timeout),
    }
}

async fn edit_queue(
    State(context): State<ServerContext>,
    SessionId(token): SessionId,
    Json(action): Json<QueueAction>,
) -> ServerResult<StatusCode> {
    context.collab.rooms.edit_queue(&token, action)?;

    Ok(StatusCode::OK)
}

pub fn router() -> Router {
    Router::new()
        .route("/playlist", get(playlist))
        .route("/enqueue", post(enqueue))
        .route("/queue", post(edit_queue))
}
