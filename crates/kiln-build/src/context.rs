use crate::error::{BuildError, BuildResult};
use crate::spec::BuildSpec;
use flate2::Compression;
use flate2::write::GzEncoder;
use std::path::{Path, PathBuf};
use tar::Builder;

const MAX_CONTEXT_SIZE: usize = 500 * 1024 * 1024; // 500MB

/// ビルドルートを基準に解決したコンテキストと Dockerfile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedContext {
    pub context_dir: PathBuf,
    pub dockerfile: PathBuf,
}

pub struct ContextBuilder;

impl ContextBuilder {
    /// BuildSpec のパスをビルドルート基準で解決
    ///
    /// コンテキストと Dockerfile はどちらもルート配下に収まっていなければならない。
    pub fn resolve(root: &Path, spec: &BuildSpec) -> BuildResult<ResolvedContext> {
        let root = root
            .canonicalize()
            .map_err(|_| BuildError::ContextNotFound(root.to_path_buf()))?;

        let context_dir = root.join(&spec.context);
        if !context_dir.is_dir() {
            return Err(BuildError::ContextNotFound(context_dir));
        }
        let context_dir = within_root(&root, &context_dir)?;

        let dockerfile = match &spec.dockerfile {
            Some(path) => context_dir.join(path),
            None => context_dir.join("Dockerfile"),
        };
        if !dockerfile.is_file() {
            return Err(BuildError::DockerfileNotFound(dockerfile));
        }
        let dockerfile = within_root(&root, &dockerfile)?;

        Ok(ResolvedContext {
            context_dir,
            dockerfile,
        })
    }

    /// ビルドコンテキストをtar.gzアーカイブとして作成
    pub fn create_context(context_path: &Path, dockerfile_path: &Path) -> BuildResult<Vec<u8>> {
        tracing::debug!("Creating build context from: {}", context_path.display());

        let mut archive_data = Vec::new();
        {
            let encoder = GzEncoder::new(&mut archive_data, Compression::default());
            let mut tar = Builder::new(encoder);

            tar.append_dir_all(".", context_path)?;

            // Dockerfileを "Dockerfile" として追加
            let dockerfile_content = std::fs::read(dockerfile_path)?;

            let mut header = tar::Header::new_gnu();
            header.set_path("Dockerfile").map_err(|e| {
                BuildError::InvalidConfig(format!("Failed to set Dockerfile path: {}", e))
            })?;
            header.set_size(dockerfile_content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();

            tar.append(&header, &dockerfile_content[..])?;

            tar.into_inner()?.finish()?;
        }

        tracing::debug!("Build context created: {} bytes", archive_data.len());

        if archive_data.len() > MAX_CONTEXT_SIZE {
            tracing::warn!(
                "Build context is large ({}MB); consider a .dockerignore",
                archive_data.len() / 1024 / 1024
            );
        }

        Ok(archive_data)
    }
}

/// シンボリックリンクや `..` を解決したうえでルート配下か確認
fn within_root(root: &Path, path: &Path) -> BuildResult<PathBuf> {
    let resolved = path.canonicalize()?;
    if !resolved.starts_with(root) {
        return Err(BuildError::InvalidConfig(format!(
            "{} is outside the build root {}",
            path.display(),
            root.display()
        )));
    }
    Ok(resolved)
}
