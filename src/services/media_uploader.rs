//! 媒体上传能力
//!
//! 对象 key 由目录、URL 作用域和文件名组成：
//! 同一 URL 重试时覆盖同一个对象，不同 URL 的同名文件互不覆盖。

use async_trait::async_trait;
use std::path::Path;
use tracing::debug;

use crate::config::Config;
use crate::error::ServiceError;

/// 媒体上传器
#[async_trait]
pub trait MediaUploader: Send + Sync {
    /// 把本地文件上传到 `key`，返回持久 URL
    async fn upload(&self, local_path: &Path, key: &str) -> Result<String, ServiceError>;
}

/// 对象 key：`<folder>/<scope>-<file name>`
///
/// `scope` 是 URL 专属的工作目录名（任务 ID + URL 下标）。
pub fn object_key(folder: &str, scope: &str, local_path: &Path) -> String {
    let file_name = local_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    format!("{}/{}-{}", folder.trim_matches('/'), scope, file_name)
}

fn content_type(local_path: &Path) -> &'static str {
    match local_path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        _ => "application/octet-stream",
    }
}

/// 基于 HTTP PUT 的对象存储上传
pub struct HttpMediaUploader {
    client: reqwest::Client,
    upload_base_url: String,
    public_base_url: String,
    token: String,
}

impl HttpMediaUploader {
    pub fn new(config: &Config) -> Self {
        Self {
            client: reqwest::Client::new(),
            upload_base_url: config.media_upload_base_url.trim_end_matches('/').to_string(),
            public_base_url: config.media_public_base_url.trim_end_matches('/').to_string(),
            token: config.media_upload_token.clone(),
        }
    }
}

#[async_trait]
impl MediaUploader for HttpMediaUploader {
    async fn upload(&self, local_path: &Path, key: &str) -> Result<String, ServiceError> {
        let body = tokio::fs::read(local_path).await?;
        debug!("上传 {} ({} 字节)", key, body.len());

        let mut request = self
            .client
            .put(format!("{}/{}", self.upload_base_url, key))
            .header(reqwest::header::CONTENT_TYPE, content_type(local_path))
            .body(body);
        if !self.token.is_empty() {
            request = request.bearer_auth(&self.token);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(ServiceError::UploadRejected {
                key: key.to_string(),
                status: response.status().as_u16(),
            });
        }
        Ok(format!("{}/{}", self.public_base_url, key))
    }
}
