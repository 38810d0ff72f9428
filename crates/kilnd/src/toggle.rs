//! デバッグ切り替え
//!
//! `?debug=<任意の値>` 付きのリクエストはビルドを行わず、プロセスの
//! ログレベルを DEBUG に上げてリクエスト内容を1件記録するだけで終わる。
//! レスポンスは明示的に書かないため、トランスポート既定の 200（空ボディ）になる。

use crate::logging::LogLevel;
use axum::extract::Query;
use axum::http::{HeaderMap, Method, Uri};
use tracing::Level;

/// 最初の `debug` パラメータが空でなければ true
///
/// キーと値はパーセントデコードしてから比較する。`;` を含むペアと
/// 不正なエスケープを含むペアは読み飛ばす。
pub fn debug_requested(uri: &Uri) -> bool {
    let Some(query) = uri.query() else {
        return false;
    };

    let kept: Vec<&str> = query.split('&').filter(|pair| well_formed(pair)).collect();
    let Ok(uri) = format!("/?{}", kept.join("&")).parse::<Uri>() else {
        return false;
    };

    match Query::<Vec<(String, String)>>::try_from_uri(&uri) {
        Ok(Query(pairs)) => pairs
            .into_iter()
            .find(|(key, _)| key == "debug")
            .is_some_and(|(_, value)| !value.is_empty()),
        Err(_) => false,
    }
}

/// `%` の後ろに16進2桁が続いているか
fn well_formed(pair: &str) -> bool {
    !pair.contains(';')
        && pair.split('%').skip(1).all(|rest| {
            rest.len() >= 2 && rest.as_bytes()[..2].iter().all(u8::is_ascii_hexdigit)
        })
}

/// ログレベルを上げ、リクエストを記録する
pub fn apply(log_level: &LogLevel, method: &Method, uri: &Uri, headers: &HeaderMap) {
    if let Err(e) = log_level.set(Level::DEBUG) {
        tracing::warn!("Could not raise log level: {}", e);
    }
    tracing::debug!(
        method = %method,
        uri = %uri,
        headers = ?headers,
        "Serving request"
    );
}
