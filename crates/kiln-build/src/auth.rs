//! レジストリ認証処理
//!
//! Docker config.json から認証情報を取得し、Bollard の DockerCredentials に変換します。

use crate::error::{BuildError, BuildResult};
use base64::Engine;
use bollard::auth::DockerCredentials;
use serde::Deserialize;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// レジストリ省略時のデフォルト
pub const DEFAULT_REGISTRY: &str = "docker.io";

/// Docker config.json の構造
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DockerConfig {
    #[serde(default)]
    auths: HashMap<String, AuthEntry>,
    /// credential helper 名 (例: "osxkeychain", "desktop")
    #[serde(default)]
    creds_store: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AuthEntry {
    /// Base64エンコードされた "username:password"
    auth: Option<String>,
}

/// credential helper からのレスポンス
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CredentialResponse {
    username: String,
    secret: String,
}

/// レジストリ認証を管理
#[derive(Debug, Clone)]
pub struct RegistryAuth {
    config_path: PathBuf,
}

impl Default for RegistryAuth {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryAuth {
    /// $DOCKER_CONFIG、なければ ~/.docker の config.json を使用
    pub fn new() -> Self {
        let config_dir = std::env::var("DOCKER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .map(|h| h.join(".docker"))
                    .unwrap_or_else(|| PathBuf::from(".docker"))
            });

        Self::with_config_dir(&config_dir)
    }

    /// config.json を含むディレクトリを指定して作成
    pub fn with_config_dir(config_dir: &Path) -> Self {
        Self {
            config_path: config_dir.join("config.json"),
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// イメージ名からレジストリの認証情報を取得
    ///
    /// # Returns
    /// * `Ok(Some(credentials))` - 認証情報が見つかった場合
    /// * `Ok(None)` - 認証情報が不要または見つからない場合
    /// * `Err(e)` - config.json の読み込みやデコードに失敗した場合
    pub fn get_credentials(&self, image: &str) -> BuildResult<Option<DockerCredentials>> {
        let registry = extract_registry(image);

        // config.json が存在しない場合は匿名で続行
        if !self.config_path.exists() {
            tracing::debug!("Docker config.json not found at {:?}", self.config_path);
            return Ok(None);
        }

        let config = self.load_docker_config()?;

        if let Some(auth_entry) = lookup_auth(&config.auths, &registry)
            && let Some(auth_b64) = &auth_entry.auth
            && let Some(creds) = decode_auth(auth_b64, &registry)?
        {
            tracing::debug!("Found credentials in auths for {}", registry);
            return Ok(Some(creds));
        }

        if let Some(helper) = &config.creds_store {
            tracing::debug!("Trying credential helper: {}", helper);
            match get_from_helper(helper, &registry) {
                Ok(Some(creds)) => return Ok(Some(creds)),
                Ok(None) => {}
                Err(e) => tracing::debug!("Credential helper unavailable: {}", e),
            }
        }

        tracing::debug!("No credentials found for {}", registry);
        Ok(None)
    }

    /// get_credentials をブロッキングスレッドで実行
    ///
    /// config.json の読み込みと credential helper の実行はどちらもブロックする。
    pub async fn credentials_for(&self, image: &str) -> BuildResult<Option<DockerCredentials>> {
        let auth = self.clone();
        let registry = extract_registry(image);
        let image = image.to_string();
        tokio::task::spawn_blocking(move || auth.get_credentials(&image))
            .await
            .map_err(|e| BuildError::AuthFailed {
                registry,
                message: format!("credential lookup aborted: {}", e),
            })?
    }

    fn load_docker_config(&self) -> BuildResult<DockerConfig> {
        let content =
            std::fs::read_to_string(&self.config_path).map_err(|e| BuildError::AuthFailed {
                registry: self.config_path.display().to_string(),
                message: format!("Failed to read config.json: {}", e),
            })?;

        serde_json::from_str(&content).map_err(|e| BuildError::AuthFailed {
            registry: self.config_path.display().to_string(),
            message: format!("Failed to parse config.json: {}", e),
        })
    }
}

/// イメージ名からレジストリを抽出
///
/// # Examples
/// - `ghcr.io/org/app:tag` -> `ghcr.io`
/// - `myuser/app:tag` -> `docker.io`
/// - `localhost:5000/app` -> `localhost:5000`
pub fn extract_registry(image: &str) -> String {
    let parts: Vec<&str> = image.split('/').collect();

    if parts.len() >= 2 {
        let first = parts[0];
        if first.contains('.') || first.contains(':') {
            return first.to_string();
        }
    }

    DEFAULT_REGISTRY.to_string()
}

/// Docker Hub は config.json 上で複数の表記がある
fn lookup_auth<'a>(auths: &'a HashMap<String, AuthEntry>, registry: &str) -> Option<&'a AuthEntry> {
    if let Some(entry) = auths.get(registry) {
        return Some(entry);
    }
    if registry == DEFAULT_REGISTRY {
        return ["https://index.docker.io/v1/", "index.docker.io"]
            .iter()
            .find_map(|key| auths.get(*key));
    }
    auths.get(&format!("https://{}", registry))
}

fn decode_auth(auth_b64: &str, registry: &str) -> BuildResult<Option<DockerCredentials>> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(auth_b64)
        .map_err(|e| BuildError::AuthFailed {
            registry: registry.to_string(),
            message: format!("Failed to decode auth: {}", e),
        })?;

    let auth_str = String::from_utf8(decoded).map_err(|e| BuildError::AuthFailed {
        registry: registry.to_string(),
        message: format!("Invalid UTF-8 in auth: {}", e),
    })?;

    Ok(auth_str
        .split_once(':')
        .map(|(username, password)| DockerCredentials {
            username: Some(username.to_string()),
            password: Some(password.to_string()),
            serveraddress: Some(registry.to_string()),
            ..Default::default()
        }))
}

/// credential helper から認証情報を取得
fn get_from_helper(helper: &str, registry: &str) -> BuildResult<Option<DockerCredentials>> {
    let helper_cmd = format!("docker-credential-{}", helper);

    let mut child = Command::new(&helper_cmd)
        .arg("get")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| BuildError::AuthFailed {
            registry: registry.to_string(),
            message: format!("Failed to run {}: {}", helper_cmd, e),
        })?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(registry.as_bytes()).ok();
    }

    let output = child
        .wait_with_output()
        .map_err(|e| BuildError::AuthFailed {
            registry: registry.to_string(),
            message: format!("Credential helper failed: {}", e),
        })?;

    if !output.status.success() {
        tracing::debug!(
            "Credential helper returned error for {}: {}",
            registry,
            String::from_utf8_lossy(&output.stderr)
        );
        return Ok(None);
    }

    let response: CredentialResponse =
        serde_json::from_slice(&output.stdout).map_err(|e| BuildError::AuthFailed {
            registry: registry.to_string(),
            message: format!("Failed to parse credential helper response: {}", e),
        })?;

    Ok(Some(DockerCredentials {
        username: Some(response.username),
        password: Some(response.secret),
        serveraddress: Some(registry.to_string()),
        ..Default::default()
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn encode(user: &str, pass: &str) -> String {
        base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", user, pass))
    }

    #[test]
    fn test_extract_registry() {
        assert_eq!(extract_registry("ghcr.io/org/app:v1.0"), "ghcr.io");
        assert_eq!(extract_registry("myuser/app:latest"), "docker.io");
        assert_eq!(extract_registry("nginx"), "docker.io");
        assert_eq!(extract_registry("localhost:5000/myapp"), "localhost:5000");
        assert_eq!(
            extract_registry("123456789.dkr.ecr.ap-northeast-1.amazonaws.com/app"),
            "123456789.dkr.ecr.ap-northeast-1.amazonaws.com"
        );
    }

    #[test]
    fn test_missing_config_is_anonymous() {
        let dir = tempdir().unwrap();
        let auth = RegistryAuth::with_config_dir(dir.path());
        assert!(auth.get_credentials("ghcr.io/org/app").unwrap().is_none());
    }

    #[test]
    fn test_credentials_from_auths() {
        let dir = tempdir().unwrap();
        let config = format!(
            r#"{{"auths": {{"ghcr.io": {{"auth": "{}"}}}}}}"#,
            encode("octocat", "s3cret")
        );
        fs::write(dir.path().join("config.json"), config).unwrap();

        let auth = RegistryAuth::with_config_dir(dir.path());
        let creds = auth.get_credentials("ghcr.io/org/app:v1").unwrap().unwrap();
        assert_eq!(creds.username.as_deref(), Some("octocat"));
        assert_eq!(creds.password.as_deref(), Some("s3cret"));
        assert_eq!(creds.serveraddress.as_deref(), Some("ghcr.io"));
    }

    #[test]
    fn test_docker_hub_legacy_key() {
        let dir = tempdir().unwrap();
        let config = format!(
            r#"{{"auths": {{"https://index.docker.io/v1/": {{"auth": "{}"}}}}}}"#,
            encode("hubuser", "pw")
        );
        fs::write(dir.path().join("config.json"), config).unwrap();

        let auth = RegistryAuth::with_config_dir(dir.path());
        let creds = auth.get_credentials("hubuser/app").unwrap().unwrap();
        assert_eq!(creds.username.as_deref(), Some("hubuser"));
    }

    #[test]
    fn test_malformed_config_fails() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("config.json"), "{ not json").unwrap();

        let auth = RegistryAuth::with_config_dir(dir.path());
        let err = auth.get_credentials("ghcr.io/org/app").unwrap_err();
        assert!(matches!(err, BuildError::AuthFailed { .. }));
    }

    #[test]
    fn test_undecodable_auth_fails() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("config.json"),
            r#"{"auths": {"ghcr.io": {"auth": "%%%"}}}"#,
        )
        .unwrap();

        let auth = RegistryAuth::with_config_dir(dir.path());
        assert!(auth.get_credentials("ghcr.io/org/app").is_err());
    }

    #[tokio::test]
    async fn test_credentials_for_off_runtime() {
        let dir = tempdir().unwrap();
        let config = format!(
            r#"{{"auths": {{"ghcr.io": {{"auth": "{}"}}}}}}"#,
            encode("octocat", "s3cret")
        );
        fs::write(dir.path().join("config.json"), config).unwrap();

        let auth = RegistryAuth::with_config_dir(dir.path());
        let creds = auth.credentials_for("ghcr.io/org/app:v1").await.unwrap().unwrap();
        assert_eq!(creds.username.as_deref(), Some("octocat"));

        fs::write(dir.path().join("config.json"), "{ not json").unwrap();
        assert!(matches!(
            auth.credentials_for("ghcr.io/org/app:v1").await,
            Err(BuildError::AuthFailed { .. })
        ));
    }

    #[test]
    fn test_docker_config_env() {
        let dir = tempdir().unwrap();
        temp_env::with_var("DOCKER_CONFIG", Some(dir.path()), || {
            let auth = RegistryAuth::new();
            assert_eq!(auth.config_path(), dir.path().join("config.json"));
        });
    }
}
