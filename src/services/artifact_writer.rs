//! 归档写入服务 - 业务能力层
//!
//! 只负责"写最终 JSON 快照"能力，不关心流程

use chrono::Utc;
use serde::Serialize;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::ServiceError;
use crate::utils::naming::slugify;

/// 归档写入服务
///
/// 职责：
/// - 每个 URL 写一个不可变的最终快照
/// - 文件只新建，不覆盖
pub struct ArtifactWriter {
    dir: PathBuf,
}

impl ArtifactWriter {
    /// 使用自定义目录创建
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// 写入快照，文件名为 `<name>-<millis>-final.json`
    pub async fn write<T: Serialize + Sync>(
        &self,
        name: &str,
        snapshot: &T,
    ) -> Result<PathBuf, ServiceError> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let mut stem = slugify(name);
        if stem.is_empty() {
            stem = "extraction".to_string();
        }
        let path = self.dir.join(format!(
            "{}-{}-final.json",
            stem,
            Utc::now().timestamp_millis()
        ));
        debug!("写入归档: {}", path.display());

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;
        file.write_all(&serde_json::to_vec_pretty(snapshot)?).await?;
        file.flush().await?;

        Ok(path)
    }
}

impl Default for ArtifactWriter {
    fn default() -> Self {
        Self::with_dir("output/processed")
    }
}
