//! ビルド要求の実行順序
//!
//! プッシュあり: 権限チェック → ビルドルート確認 → ビルド → プッシュ。
//! プッシュなし: ビルドのみ。
//!
//! どのステップも1回だけ実行し、失敗したらそれ以降には進まない。
//! プッシュに失敗してもビルド済みイメージは残る。

use crate::decode::DecodeError;
use crate::logging::LogLevel;
use kiln_build::{BuildError, BuildSpec, Builder, BuiltImage};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// 1リクエストの最終結果
#[derive(Debug)]
pub enum Outcome {
    /// `pushed` はプッシュなしの場合 None
    Success {
        image: BuiltImage,
        pushed: Option<Vec<String>>,
    },
    ValidationError(DecodeError),
    PermissionError(BuildError),
    InternalError(io::Error),
    BuildError(BuildError),
    PushError(BuildError),
}

pub struct Orchestrator {
    builder: Arc<dyn Builder>,
    root: PathBuf,
    log_level: Arc<LogLevel>,
}

impl Orchestrator {
    pub fn new(
        builder: Arc<dyn Builder>,
        root: impl Into<PathBuf>,
        log_level: Arc<LogLevel>,
    ) -> Self {
        Self {
            builder,
            root: root.into(),
            log_level,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// HTTP 側と共有しているログレベル
    pub fn log_level(&self) -> &Arc<LogLevel> {
        &self.log_level
    }

    pub async fn run(&self, spec: &BuildSpec) -> Outcome {
        tracing::debug!(
            level = %self.log_level.current(),
            no_push = spec.no_push,
            destinations = spec.destinations.len(),
            "Running build request"
        );

        if spec.no_push {
            return self.build_only(spec).await;
        }

        if let Err(e) = self.builder.check_push_permissions(spec).await {
            tracing::warn!("Push permission check failed: {}", e);
            return Outcome::PermissionError(e);
        }

        let root = match normalize_root(&self.root).await {
            Ok(root) => root,
            Err(e) => {
                tracing::error!("Build root {} unusable: {}", self.root.display(), e);
                return Outcome::InternalError(e);
            }
        };

        let image = match self.builder.build(spec, &root).await {
            Ok(image) => image,
            Err(e) => {
                tracing::error!("Build failed: {}", e);
                return Outcome::BuildError(e);
            }
        };
        tracing::info!("Built {}", image.reference);

        match self.builder.push(&image, spec).await {
            Ok(pushed) => {
                tracing::info!("Pushed {}", pushed.join(", "));
                Outcome::Success {
                    image,
                    pushed: Some(pushed),
                }
            }
            Err(e) => {
                tracing::error!("Push of {} failed: {}", image.reference, e);
                Outcome::PushError(e)
            }
        }
    }

    async fn build_only(&self, spec: &BuildSpec) -> Outcome {
        match self.builder.build(spec, &self.root).await {
            Ok(image) => {
                tracing::info!("Built {} (no push)", image.reference);
                Outcome::Success {
                    image,
                    pushed: None,
                }
            }
            Err(e) => {
                tracing::error!("Build failed: {}", e);
                Outcome::BuildError(e)
            }
        }
    }
}

/// ビルドルートを絶対パスに解決し、ディレクトリであることを確認
async fn normalize_root(root: &Path) -> io::Result<PathBuf> {
    let root = tokio::fs::canonicalize(root).await?;
    if !tokio::fs::metadata(&root).await?.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotADirectory,
            format!("{} is not a directory", root.display()),
        ));
    }
    Ok(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Call, ScriptedBuilder};
    use tempfile::tempdir;
    use tracing::Level;

    fn spec(json: &str) -> BuildSpec {
        serde_json::from_str(json).unwrap()
    }

    fn orchestrator(builder: &Arc<ScriptedBuilder>, root: &Path) -> Orchestrator {
        Orchestrator::new(
            builder.clone(),
            root,
            Arc::new(LogLevel::detached(Level::INFO)),
        )
    }

    #[tokio::test]
    async fn test_shares_log_level_cell() {
        let root = tempdir().unwrap();
        let builder = Arc::new(ScriptedBuilder::new());
        let log_level = Arc::new(LogLevel::detached(Level::INFO));
        let orchestrator = Orchestrator::new(builder.clone(), root.path(), log_level.clone());

        assert!(Arc::ptr_eq(orchestrator.log_level(), &log_level));

        log_level.set(Level::DEBUG).unwrap();
        assert_eq!(orchestrator.log_level().current(), Level::DEBUG);

        // レベルが変わってもビルドの流れは同じ
        let outcome = orchestrator.run(&spec(r#"{"no-push": true}"#)).await;
        assert!(matches!(outcome, Outcome::Success { pushed: None, .. }));
    }

    #[tokio::test]
    async fn test_no_push_builds_once() {
        let root = tempdir().unwrap();
        let builder = Arc::new(ScriptedBuilder::new());

        let outcome = orchestrator(&builder, root.path())
            .run(&spec(r#"{"no-push": true}"#))
            .await;

        assert!(matches!(outcome, Outcome::Success { pushed: None, .. }));
        assert_eq!(builder.calls(), vec![Call::Build]);
    }

    #[tokio::test]
    async fn test_no_push_build_failure() {
        let root = tempdir().unwrap();
        let builder = Arc::new(ScriptedBuilder::new().fail_build("no space left"));

        let outcome = orchestrator(&builder, root.path())
            .run(&spec(r#"{"no-push": true}"#))
            .await;

        assert!(matches!(outcome, Outcome::BuildError(_)));
        assert_eq!(builder.calls(), vec![Call::Build]);
    }

    #[tokio::test]
    async fn test_push_path_order() {
        let root = tempdir().unwrap();
        let builder = Arc::new(ScriptedBuilder::new());

        let outcome = orchestrator(&builder, root.path())
            .run(&spec(r#"{"destinations": ["ghcr.io/org/app:v1"]}"#))
            .await;

        match outcome {
            Outcome::Success { pushed, .. } => {
                assert_eq!(pushed, Some(vec!["ghcr.io/org/app:v1".to_string()]));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(
            builder.calls(),
            vec![Call::CheckPushPermissions, Call::Build, Call::Push]
        );
    }

    #[tokio::test]
    async fn test_permission_failure_stops_before_root_check() {
        let builder = Arc::new(ScriptedBuilder::new().fail_permissions("denied"));

        // 存在しないルートでも InternalError にはならない
        let outcome = orchestrator(&builder, Path::new("/nonexistent/kiln-root"))
            .run(&spec(r#"{"destinations": ["registry.invalid/repo"]}"#))
            .await;

        assert!(matches!(outcome, Outcome::PermissionError(_)));
        assert_eq!(builder.calls(), vec![Call::CheckPushPermissions]);
    }

    #[tokio::test]
    async fn test_missing_root_is_internal_error() {
        let builder = Arc::new(ScriptedBuilder::new());

        let outcome = orchestrator(&builder, Path::new("/nonexistent/kiln-root"))
            .run(&spec(r#"{"destinations": ["registry.invalid/repo"]}"#))
            .await;

        assert!(matches!(outcome, Outcome::InternalError(_)));
        assert_eq!(builder.calls(), vec![Call::CheckPushPermissions]);
    }

    #[tokio::test]
    async fn test_root_must_be_directory() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, "").unwrap();
        let builder = Arc::new(ScriptedBuilder::new());

        let outcome = orchestrator(&builder, &file)
            .run(&spec(r#"{"destinations": ["registry.invalid/repo"]}"#))
            .await;

        assert!(matches!(outcome, Outcome::InternalError(_)));
    }

    #[tokio::test]
    async fn test_build_receives_canonical_root() {
        let root = tempdir().unwrap();
        let builder = Arc::new(ScriptedBuilder::new());

        orchestrator(&builder, &root.path().join("."))
            .run(&spec(r#"{"destinations": ["registry.invalid/repo"]}"#))
            .await;

        let canonical = std::fs::canonicalize(root.path()).unwrap();
        assert_eq!(builder.build_roots(), vec![canonical]);
    }

    #[tokio::test]
    async fn test_build_failure_skips_push() {
        let root = tempdir().unwrap();
        let builder = Arc::new(ScriptedBuilder::new().fail_build("COPY failed"));

        let outcome = orchestrator(&builder, root.path())
            .run(&spec(r#"{"destinations": ["registry.invalid/repo"]}"#))
            .await;

        assert!(matches!(outcome, Outcome::BuildError(_)));
        assert_eq!(builder.calls(), vec![Call::CheckPushPermissions, Call::Build]);
    }

    #[tokio::test]
    async fn test_push_failure_after_build() {
        let root = tempdir().unwrap();
        let builder = Arc::new(ScriptedBuilder::new().fail_push("unauthorized"));

        let outcome = orchestrator(&builder, root.path())
            .run(&spec(r#"{"destinations": ["registry.invalid/repo"]}"#))
            .await;

        assert!(matches!(outcome, Outcome::PushError(_)));
        assert_eq!(
            builder.calls(),
            vec![Call::CheckPushPermissions, Call::Build, Call::Push]
        );
        assert_eq!(builder.built().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_build_is_reproducible() {
        let root = tempdir().unwrap();
        let builder = Arc::new(ScriptedBuilder::new().fail_build("bad Dockerfile"));
        let orchestrator = orchestrator(&builder, root.path());
        let spec = spec(r#"{"no-push": true}"#);

        for _ in 0..3 {
            assert!(matches!(
                orchestrator.run(&spec).await,
                Outcome::BuildError(_)
            ));
        }
        assert_eq!(builder.calls().len(), 3);
    }
}
