//! テスト用のビルダー
//!
//! 呼び出し順を記録し、指定したステップだけ失敗させる。

use async_trait::async_trait;
use kiln_build::{BuildError, BuildResult, BuildSpec, Builder, BuiltImage};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    CheckPushPermissions,
    Build,
    Push,
}

#[derive(Default)]
pub struct ScriptedBuilder {
    permission_error: Option<String>,
    build_error: Option<String>,
    push_error: Option<String>,
    calls: Mutex<Vec<Call>>,
    build_roots: Mutex<Vec<PathBuf>>,
    built: Mutex<Vec<BuiltImage>>,
}

impl ScriptedBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_permissions(mut self, message: &str) -> Self {
        self.permission_error = Some(message.to_string());
        self
    }

    pub fn fail_build(mut self, message: &str) -> Self {
        self.build_error = Some(message.to_string());
        self
    }

    pub fn fail_push(mut self, message: &str) -> Self {
        self.push_error = Some(message.to_string());
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// build に渡されたルートディレクトリ
    pub fn build_roots(&self) -> Vec<PathBuf> {
        self.build_roots.lock().unwrap().clone()
    }

    /// ビルドに成功したイメージ（プッシュ失敗後も残る）
    pub fn built(&self) -> Vec<BuiltImage> {
        self.built.lock().unwrap().clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl Builder for ScriptedBuilder {
    async fn check_push_permissions(&self, _spec: &BuildSpec) -> BuildResult<()> {
        self.record(Call::CheckPushPermissions);
        match &self.permission_error {
            Some(message) => Err(BuildError::AuthFailed {
                registry: "registry.invalid".to_string(),
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }

    async fn build(&self, spec: &BuildSpec, root: &Path) -> BuildResult<BuiltImage> {
        self.record(Call::Build);
        self.build_roots.lock().unwrap().push(root.to_path_buf());
        if let Some(message) = &self.build_error {
            return Err(BuildError::BuildFailed(message.clone()));
        }

        let reference = spec
            .destinations
            .first()
            .cloned()
            .unwrap_or_else(|| "kiln-local:test".to_string());
        let image = BuiltImage {
            reference: reference.clone(),
            id: Some("sha256:0123456789abcdef".to_string()),
            tags: vec![reference],
        };
        self.built.lock().unwrap().push(image.clone());
        Ok(image)
    }

    async fn push(&self, _image: &BuiltImage, spec: &BuildSpec) -> BuildResult<Vec<String>> {
        self.record(Call::Push);
        match &self.push_error {
            Some(message) => Err(BuildError::PushFailed {
                message: message.clone(),
            }),
            None => Ok(spec.destinations.clone()),
        }
    }
}
