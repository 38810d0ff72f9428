//! ビルド仕様
//!
//! リクエストボディとして受け取る JSON をそのまま表す型です。
//! 未知のフィールドは拒否します。

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Dockerfile から参照できるベースイメージ用のビルド引数名
pub const BASE_IMAGE_ARG: &str = "BASE_IMAGE";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct BuildSpec {
    /// true ならビルドのみ行い、プッシュしない
    #[serde(default)]
    pub no_push: bool,

    /// ビルドコンテキスト（相対パスはビルドルート基準）
    #[serde(default = "default_context")]
    pub context: PathBuf,

    /// Dockerfile のパス（相対パスはコンテキスト基準）
    #[serde(default)]
    pub dockerfile: Option<PathBuf>,

    /// プッシュ先イメージ（例: ghcr.io/org/app:v1.0）
    #[serde(default)]
    pub destinations: Vec<String>,

    #[serde(default)]
    pub build_args: HashMap<String, String>,

    #[serde(default)]
    pub base_image: Option<String>,

    /// マルチステージビルドのターゲット
    #[serde(default)]
    pub target: Option<String>,

    #[serde(default)]
    pub no_cache: bool,

    /// ベースイメージを常に pull する
    #[serde(default = "default_pull")]
    pub pull: bool,
}

fn default_context() -> PathBuf {
    PathBuf::from(".")
}

fn default_pull() -> bool {
    true
}

impl BuildSpec {
    /// base-image を BASE_IMAGE として合成したビルド引数
    ///
    /// build-args に BASE_IMAGE が明示されていればそちらを優先します。
    pub fn effective_build_args(&self) -> HashMap<String, String> {
        let mut args = self.build_args.clone();
        if let Some(base) = &self.base_image {
            args.entry(BASE_IMAGE_ARG.to_string())
                .or_insert_with(|| base.clone());
        }
        args
    }
}
