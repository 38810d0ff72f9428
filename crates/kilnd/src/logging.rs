//! プロセス全体のログレベル
//!
//! 起動時に一度だけ subscriber を組み立て、その後は [`LogLevel`] 経由で
//! レベルを差し替えます。各コンポーネントには `Arc<LogLevel>` を渡します。

use std::sync::RwLock;
use thiserror::Error;
use tracing::Level;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{Registry, reload};

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log level: {0}")]
    InvalidLevel(String),

    #[error("failed to install log subscriber: {0}")]
    Install(String),

    #[error("failed to reload log level: {0}")]
    Reload(#[from] reload::Error),
}

/// 現在のログレベルを保持するセル
pub struct LogLevel {
    current: RwLock<Level>,
    handle: Option<reload::Handle<LevelFilter, Registry>>,
}

impl LogLevel {
    /// グローバル subscriber（stderr への fmt 出力）をインストール
    pub fn init(level: &str) -> Result<Self, LoggingError> {
        let level = parse_level(level)?;
        let (filter, handle) = reload::Layer::new(LevelFilter::from_level(level));

        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
            .map_err(|e| LoggingError::Install(e.to_string()))?;

        Ok(Self {
            current: RwLock::new(level),
            handle: Some(handle),
        })
    }

    /// subscriber を持たないセル
    pub fn detached(level: Level) -> Self {
        Self {
            current: RwLock::new(level),
            handle: None,
        }
    }

    pub fn current(&self) -> Level {
        *self.current.read().unwrap_or_else(|e| e.into_inner())
    }

    /// レベルを変更する。以降のすべてのログ出力に反映され、元には戻らない
    pub fn set(&self, level: Level) -> Result<(), LoggingError> {
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = &self.handle {
            handle.reload(LevelFilter::from_level(level))?;
        }
        *current = level;
        Ok(())
    }
}

pub fn parse_level(level: &str) -> Result<Level, LoggingError> {
    level
        .parse()
        .map_err(|_| LoggingError::InvalidLevel(level.to_string()))
}
