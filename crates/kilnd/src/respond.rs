use crate::orchestrator::Outcome;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Outcome をステータスコードとプレーンテキストに変換
pub fn respond(outcome: Outcome) -> Response {
    match outcome {
        Outcome::Success { pushed: None, .. } => (StatusCode::OK, "Success").into_response(),
        // プッシュ成功時は本文を書かない
        Outcome::Success { pushed: Some(_), .. } => StatusCode::OK.into_response(),
        Outcome::ValidationError(e) => (
            StatusCode::BAD_REQUEST,
            format!("Could not parse JSON body: {}", e),
        )
            .into_response(),
        Outcome::PermissionError(e) => (
            StatusCode::BAD_REQUEST,
            format!("Error checking push permissions: {}", e),
        )
            .into_response(),
        Outcome::InternalError(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Error changing to root dir: {}", e),
        )
            .into_response(),
        Outcome::BuildError(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Error building image: {}", e),
        )
            .into_response(),
        Outcome::PushError(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Error pushing image: {}", e),
        )
            .into_response(),
    }
}
