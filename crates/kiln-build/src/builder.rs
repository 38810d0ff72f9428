use crate::error::{BuildError, BuildResult};
use bollard::Docker;
use bytes::Bytes;
use futures_util::stream::StreamExt;
use http_body_util::{Either, Full};
use std::collections::HashMap;

/// bollard でのイメージビルド
pub struct ImageBuilder {
    docker: Docker,
}

/// ビルドオプション（BuildSpec から組み立てる）
#[derive(Debug, Default)]
pub struct BuildOptions<'a> {
    pub tag: &'a str,
    pub build_args: HashMap<String, String>,
    pub target: Option<&'a str>,
    pub no_cache: bool,
    pub pull: bool,
}

impl ImageBuilder {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// イメージをビルドし、取得できればイメージIDを返す
    pub async fn build_image(
        &self,
        context_data: Vec<u8>,
        options: BuildOptions<'_>,
    ) -> BuildResult<Option<String>> {
        tracing::info!("Building image: {}", options.tag);

        let build_args_refs: HashMap<&str, &str> = options
            .build_args
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        #[allow(deprecated)]
        let bollard_options = bollard::image::BuildImageOptions {
            dockerfile: "Dockerfile",
            t: options.tag,
            buildargs: build_args_refs,
            target: options.target.unwrap_or(""),
            nocache: options.no_cache,
            rm: true,
            forcerm: true, // ビルド失敗時も中間コンテナを削除
            pull: options.pull,
            ..Default::default()
        };

        tracing::debug!("Build options: {:?}", bollard_options);

        let body = Full::new(Bytes::from(context_data));
        let mut stream = self
            .docker
            .build_image(bollard_options, None, Some(Either::Left(body)));

        let mut image_id = None;
        while let Some(msg) = stream.next().await {
            let output = msg.map_err(BuildError::DockerConnection)?;
            if let Some(id) = handle_build_output(output)? {
                image_id = Some(id);
            }
        }

        tracing::info!("Successfully built: {}", options.tag);
        Ok(image_id)
    }

    /// ビルド済みイメージに別名のタグを付与
    pub async fn tag_image(&self, source: &str, repo: &str, tag: &str) -> BuildResult<()> {
        tracing::debug!("Tagging {} as {}:{}", source, repo, tag);
        let options = bollard::query_parameters::TagImageOptionsBuilder::default()
            .repo(repo)
            .tag(tag)
            .build();
        self.docker.tag_image(source, Some(options)).await?;
        Ok(())
    }
}

/// ビルド出力の処理
///
/// エラー行があれば BuildFailed、aux 行があればイメージIDを返す。
fn handle_build_output(output: bollard::models::BuildInfo) -> BuildResult<Option<String>> {
    if let Some(stream) = output.stream {
        let line = stream.trim_end();
        if !line.is_empty() {
            tracing::debug!(target: "kiln_build::output", "{}", line);
        }
    }

    if let Some(error) = output.error {
        return Err(BuildError::BuildFailed(error));
    }

    if let Some(error_detail) = output.error_detail {
        let error_msg = error_detail
            .message
            .unwrap_or_else(|| "Unknown build error".to_string());
        return Err(BuildError::BuildFailed(error_msg));
    }

    if let Some(status) = output.status {
        tracing::debug!(target: "kiln_build::output", "{}", status);
    }

    Ok(output.aux.and_then(|aux| aux.id))
}
