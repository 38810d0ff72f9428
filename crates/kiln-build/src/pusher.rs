//! イメージプッシュ処理
//!
//! ビルドしたイメージをコンテナレジストリにプッシュします。

use crate::auth::RegistryAuth;
use crate::error::{BuildError, BuildResult};
use crate::reference::validate_tag;
use bollard::Docker;
use bollard::models::PushImageInfo;
use futures_util::StreamExt;

/// イメージプッシュを実行するハンドラ
pub struct ImagePusher {
    docker: Docker,
    auth: RegistryAuth,
}

impl ImagePusher {
    pub fn new(docker: Docker, auth: RegistryAuth) -> Self {
        Self { docker, auth }
    }

    /// イメージをレジストリにプッシュ
    ///
    /// # Arguments
    /// * `image` - イメージ名（レジストリ込み、タグなし）
    /// * `tag` - イメージタグ
    ///
    /// # Returns
    /// プッシュ成功時は完全なイメージ名を返す
    pub async fn push(&self, image: &str, tag: &str) -> BuildResult<String> {
        let full_image = format!("{}:{}", image, tag);

        validate_tag(tag)?;

        let credentials = self.auth.credentials_for(&full_image).await?;

        #[allow(deprecated)]
        let options = bollard::image::PushImageOptions::<String> {
            tag: tag.to_string(),
        };

        tracing::info!("Pushing image: {}", full_image);

        #[allow(deprecated)]
        let mut stream = self.docker.push_image(image, Some(options), credentials);

        let mut last_status = String::new();
        let mut error_message: Option<String> = None;

        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(err) = info.error {
                        error_message = Some(err);
                    } else {
                        log_progress(&info, &mut last_status);
                    }
                }
                Err(e) => {
                    return Err(BuildError::PushFailed {
                        message: e.to_string(),
                    });
                }
            }
        }

        if let Some(err) = error_message {
            return Err(BuildError::PushFailed { message: err });
        }

        tracing::info!("Pushed: {}", full_image);
        Ok(full_image)
    }
}

/// プッシュ進捗をログに出す（同じステータスの連続は省略）
fn log_progress(info: &PushImageInfo, last_status: &mut String) {
    let Some(status) = &info.status else {
        return;
    };

    match status.as_str() {
        "Preparing" | "Waiting" | "Pushing" => {}
        _ if status.as_str() != last_status.as_str() => {
            tracing::debug!(target: "kiln_build::output", "{}", status);
            *last_status = status.clone();
        }
        _ => {}
    }
}
