//! Profile pictures that track the current level.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;

/// Produces the profile picture for a level.
#[async_trait]
pub trait LevelImageCompositor: Send + Sync {
    /// Encoded image bytes, ready for upload.
    async fn compose(&self, level: u32) -> Result<Vec<u8>>;
}

/// Pictures rendered ahead of time as `<dir>/level_<n>.png`.
pub struct PrerenderedLevelImages {
    dir: PathBuf,
}

impl PrerenderedLevelImages {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, level: u32) -> PathBuf {
        self.dir.join(format!("level_{}.png", level))
    }
}

#[async_trait]
impl LevelImageCompositor for PrerenderedLevelImages {
    async fn compose(&self, level: u32) -> Result<Vec<u8>> {
        let path = self.path_for(level);
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("No profile image for level {} at {}", level, path.display()))
    }
}
