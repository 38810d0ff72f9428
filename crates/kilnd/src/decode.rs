use axum::body::{Body, Bytes};
use kiln_build::BuildSpec;
use thiserror::Error;

/// リクエストボディの上限。超えた場合はデコード失敗として扱う
pub const MAX_BODY_SIZE: usize = 64 * 1024 * 1024;

/// リクエストボディを BuildSpec として解釈できなかった
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("{0}")]
    Json(#[from] serde_json::Error),

    /// 読み込み中の切断や上限超過
    #[error("{0}")]
    Body(#[from] axum::Error),
}

/// ボディを `limit` バイトまで読み込む
pub async fn read_body(body: Body, limit: usize) -> Result<Bytes, DecodeError> {
    Ok(axum::body::to_bytes(body, limit).await?)
}

/// リクエストボディを厳密にデコード
///
/// 空ボディ・末尾のゴミ・未知フィールドはすべてエラー。
pub fn decode_spec(body: &[u8]) -> Result<BuildSpec, DecodeError> {
    Ok(serde_json::from_slice(body)?)
}
