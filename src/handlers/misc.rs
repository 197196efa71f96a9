//! Read-only limits the clients mirror in their forms.

use axum::{extract::State, response::Json};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::server::AppState;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CommentDepthResponse {
    pub max_comment_reply_depth: i32,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SubtaskDepthResponse {
    pub max_subtask_depth: i32,
}

#[utoipa::path(
    get,
    path = "/api/v1/misc/comment-depth",
    responses((status = 200, description = "Maximum comment reply depth", body = CommentDepthResponse)),
    tag = "misc"
)]
pub async fn comment_depth(State(state): State<AppState>) -> Json<CommentDepthResponse> {
    Json(CommentDepthResponse {
        max_comment_reply_depth: state.config.max_comment_reply_depth,
    })
}

#[utoipa::path(
    get,
    path = "/api/v1/misc/subtask-depth",
    responses((status = 200, description = "Maximum subtask depth", body = SubtaskDepthResponse)),
    tag = "misc"
)]
pub async fn subtask_depth(State(state): State<AppState>) -> Json<SubtaskDepthResponse> {
    Json(SubtaskDepthResponse {
        max_subtask_depth: state.config.max_subtask_depth,
    })
}
