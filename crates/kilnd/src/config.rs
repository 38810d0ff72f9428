use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "kilnd")]
#[command(about = "Build container images over HTTP and push them to a registry", long_about = None)]
pub struct Config {
    /// 待ち受けアドレス
    #[arg(long, env = "KILN_LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// ビルドコンテキストの基準ディレクトリ
    #[arg(long, env = "KILN_ROOT_DIR", default_value = "/workspace")]
    pub root_dir: PathBuf,

    /// 起動時のログレベル (trace, debug, info, warn, error)
    #[arg(long, env = "KILN_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// config.json を含む Docker 設定ディレクトリ
    #[arg(long, env = "DOCKER_CONFIG")]
    pub docker_config: Option<PathBuf>,
}
