//! ビルドバックエンドの抽象化
//!
//! HTTP 側はこのトレイト越しにビルダーを呼び出します。テストでは
//! 成功・失敗を決め打ちできる実装に差し替えます。

use crate::auth::RegistryAuth;
use crate::builder::{BuildOptions, ImageBuilder};
use crate::context::ContextBuilder;
use crate::error::{BuildError, BuildResult};
use crate::pusher::ImagePusher;
use crate::reference::parse_destination;
use crate::spec::BuildSpec;
use async_trait::async_trait;
use bollard::Docker;
use std::path::Path;

/// ビルド済みイメージのハンドル
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltImage {
    /// ビルド時に付けたタグ（プッシュ先の先頭、なければローカル用タグ）
    pub reference: String,
    /// デーモンが返したイメージID
    pub id: Option<String>,
    /// reference を含む、付与済みのすべてのタグ
    pub tags: Vec<String>,
}

/// ビルダーが提供する3つの操作
#[async_trait]
pub trait Builder: Send + Sync {
    /// プッシュ先へ書き込めるかを確認する。ファイルシステムは変更しない
    async fn check_push_permissions(&self, spec: &BuildSpec) -> BuildResult<()>;

    /// `root` を基準にコンテキストを解決してビルドする
    async fn build(&self, spec: &BuildSpec, root: &Path) -> BuildResult<BuiltImage>;

    /// すべてのプッシュ先へ送る。最初の失敗で中断
    async fn push(&self, image: &BuiltImage, spec: &BuildSpec) -> BuildResult<Vec<String>>;
}

/// プッシュ先の参照と認証情報を検証
pub async fn check_destinations(spec: &BuildSpec, auth: &RegistryAuth) -> BuildResult<()> {
    if spec.destinations.is_empty() {
        return Err(BuildError::NoDestinations);
    }

    for destination in &spec.destinations {
        let (image, tag) = parse_destination(destination)?;
        auth.credentials_for(&format!("{}:{}", image, tag)).await?;
    }

    Ok(())
}

/// Docker デーモンを使うビルダー
pub struct DockerBuilder {
    images: ImageBuilder,
    pusher: ImagePusher,
    auth: RegistryAuth,
}

impl DockerBuilder {
    pub fn new(docker: Docker, auth: RegistryAuth) -> Self {
        Self {
            images: ImageBuilder::new(docker.clone()),
            pusher: ImagePusher::new(docker, auth.clone()),
            auth,
        }
    }

    /// DOCKER_HOST などの環境設定から接続
    pub fn connect(auth: RegistryAuth) -> BuildResult<Self> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self::new(docker, auth))
    }
}

/// プッシュ先がないビルド用のタグ
fn local_reference() -> String {
    format!(
        "kiln-local:{}",
        chrono::Utc::now().format("%Y%m%d%H%M%S%3f")
    )
}

#[async_trait]
impl Builder for DockerBuilder {
    async fn check_push_permissions(&self, spec: &BuildSpec) -> BuildResult<()> {
        check_destinations(spec, &self.auth).await
    }

    async fn build(&self, spec: &BuildSpec, root: &Path) -> BuildResult<BuiltImage> {
        let root = root.to_path_buf();
        let owned_spec = spec.clone();
        let context_data = tokio::task::spawn_blocking(move || {
            let resolved = ContextBuilder::resolve(&root, &owned_spec)?;
            ContextBuilder::create_context(&resolved.context_dir, &resolved.dockerfile)
        })
        .await
        .map_err(|e| BuildError::BuildFailed(format!("context packing aborted: {}", e)))??;

        let destinations = spec
            .destinations
            .iter()
            .map(|d| parse_destination(d))
            .collect::<BuildResult<Vec<_>>>()?;

        let reference = match destinations.first() {
            Some((image, tag)) => format!("{}:{}", image, tag),
            None => local_reference(),
        };

        let id = self
            .images
            .build_image(
                context_data,
                BuildOptions {
                    tag: &reference,
                    build_args: spec.effective_build_args(),
                    target: spec.target.as_deref(),
                    no_cache: spec.no_cache,
                    pull: spec.pull,
                },
            )
            .await?;

        let mut tags = vec![reference.clone()];
        for (image, tag) in destinations.iter().skip(1) {
            self.images.tag_image(&reference, image, tag).await?;
            tags.push(format!("{}:{}", image, tag));
        }

        Ok(BuiltImage { reference, id, tags })
    }

    async fn push(&self, image: &BuiltImage, spec: &BuildSpec) -> BuildResult<Vec<String>> {
        tracing::debug!("Pushing {} ({} destinations)", image.reference, spec.destinations.len());

        let mut pushed = Vec::with_capacity(spec.destinations.len());
        for destination in &spec.destinations {
            let (repo, tag) = parse_destination(destination)?;
            pushed.push(self.pusher.push(&repo, &tag).await?);
        }
        Ok(pushed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn spec(json: &str) -> BuildSpec {
        serde_json::from_str(json).unwrap()
    }

    #[tokio::test]
    async fn test_check_destinations_requires_destination() {
        let dir = tempdir().unwrap();
        let auth = RegistryAuth::with_config_dir(dir.path());
        let err = check_destinations(&spec("{}"), &auth).await.unwrap_err();
        assert!(matches!(err, BuildError::NoDestinations));
    }

    #[tokio::test]
    async fn test_check_destinations_anonymous_ok() {
        let dir = tempdir().unwrap();
        let auth = RegistryAuth::with_config_dir(dir.path());
        let s = spec(r#"{"destinations": ["registry.invalid/repo", "ghcr.io/org/app:v1"]}"#);
        assert!(check_destinations(&s, &auth).await.is_ok());
    }

    #[tokio::test]
    async fn test_check_destinations_invalid_tag() {
        let dir = tempdir().unwrap();
        let auth = RegistryAuth::with_config_dir(dir.path());
        let s = spec(r#"{"destinations": ["ghcr.io/org/app:-bad"]}"#);
        let err = check_destinations(&s, &auth).await.unwrap_err();
        assert!(matches!(err, BuildError::InvalidTag { .. }));
    }

    #[tokio::test]
    async fn test_check_destinations_broken_credential_store() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("config.json"), "[").unwrap();
        let auth = RegistryAuth::with_config_dir(dir.path());
        let s = spec(r#"{"destinations": ["registry.invalid/repo"]}"#);
        let err = check_destinations(&s, &auth).await.unwrap_err();
        assert!(matches!(err, BuildError::AuthFailed { .. }));
    }

    #[test]
    fn test_local_reference_is_valid_tag() {
        let reference = local_reference();
        let (image, tag) = parse_destination(&reference).unwrap();
        assert_eq!(image, "kiln-local");
        assert!(!tag.is_empty());
    }

    #[tokio::test]
    #[ignore] // Docker接続が必要なため、通常のテストではスキップ
    async fn test_build_simple_image() {
        let root = tempdir().unwrap();
        fs::write(root.path().join("Dockerfile"), "FROM alpine:latest\nCMD echo 'test'").unwrap();

        let config_dir = tempdir().unwrap();
        let builder = DockerBuilder::connect(RegistryAuth::with_config_dir(config_dir.path())).unwrap();

        let image = builder
            .build(&spec(r#"{"no-push": true}"#), root.path())
            .await
            .unwrap();
        assert!(image.reference.starts_with("kiln-local:"));
    }
}
