//! 浏览器抽取器
//!
//! 通过 `JsExecutor` 打开题目页面并执行抽取脚本，
//! 需要时把图片下载到本次抽取的工作目录。

use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{ExtractOptions, ExtractProgress, Extractor, ProgressSink};
use crate::error::ExtractError;
use crate::infrastructure::JsExecutor;
use crate::models::{ExtractedItem, ExtractionMetadata, ExtractionResult};

/// 页面抽取脚本返回的结构
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageExtraction {
    #[serde(default)]
    requires_login: bool,
    #[serde(default)]
    items: Vec<ExtractedItem>,
    #[serde(default)]
    metadata: ExtractionMetadata,
}

const EXTRACT_SCRIPT: &str = r#"
(() => {
    const text = (el) => (el ? el.innerText.trim() : '');
    if (document.querySelector('form[action*="login"], input[type="password"]')) {
        return { requiresLogin: true, items: [] };
    }
    const items = Array.from(document.querySelectorAll('[data-question], .questao, .question')).map((q, i) => {
        const alternatives = Array.from(q.querySelectorAll('[data-alternative], .alternativa, li'))
            .map((a) => text(a))
            .filter((a) => a.length > 0);
        const correctEl = q.querySelector('[data-correct="true"], .alternativa.correta');
        const allAlts = Array.from(q.querySelectorAll('[data-alternative], .alternativa, li'));
        const correct = correctEl ? allAlts.indexOf(correctEl) : -1;
        return {
            number: q.getAttribute('data-number') || String(i + 1),
            statement: text(q.querySelector('[data-statement], .enunciado, .statement')),
            alternatives,
            correct: correct >= 0 ? correct : undefined,
            explanation: text(q.querySelector('[data-explanation], .explicacao')),
            comment: text(q.querySelector('[data-comment], .comentario')),
            tags: [],
            images: Array.from(q.querySelectorAll('img')).map((img) => img.src).filter(Boolean),
            annulled: q.classList.contains('anulada') || q.getAttribute('data-annulled') === 'true',
        };
    });
    const title = document.querySelector('h1');
    const yearMatch = document.title.match(/(19|20)\d{2}/);
    return {
        requiresLogin: false,
        items,
        metadata: {
            examName: title ? title.innerText.trim() : document.title,
            examYear: yearMatch ? parseInt(yearMatch[0], 10) : undefined,
        },
    };
})()
"#;

/// 浏览器抽取器
///
/// 共用一个 page；全局单抽取由编排层保证，这里不再加锁。
pub struct BrowserExtractor {
    executor: Arc<JsExecutor>,
    http: reqwest::Client,
}

impl BrowserExtractor {
    pub fn new(executor: Arc<JsExecutor>) -> Self {
        Self {
            executor,
            http: reqwest::Client::new(),
        }
    }

    /// 下载远程图片到工作目录，成功的引用替换为本地路径
    async fn download_images(
        &self,
        items: &mut [ExtractedItem],
        work_dir: &Path,
        working_files: &mut Vec<PathBuf>,
    ) -> Result<(), ExtractError> {
        tokio::fs::create_dir_all(work_dir).await?;

        for (item_idx, item) in items.iter_mut().enumerate() {
            for (img_idx, image) in item.images.iter_mut().enumerate() {
                if !image.starts_with("http") {
                    continue;
                }
                let target = work_dir.join(format!(
                    "q{}-{}.{}",
                    item_idx + 1,
                    img_idx + 1,
                    image_extension(image)
                ));
                match self.fetch_to(image, &target).await {
                    Ok(()) => {
                        debug!("图片已下载: {}", target.display());
                        *image = target.to_string_lossy().into_owned();
                        working_files.push(target);
                    }
                    Err(e) => {
                        // 保留远程地址，媒体阶段会直接跳过
                        warn!("⚠️ 图片下载失败 {}: {}", image, e);
                    }
                }
            }
        }
        Ok(())
    }

    async fn fetch_to(&self, url: &str, target: &Path) -> Result<(), ExtractError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ExtractError::Browser(format!("下载失败: {}", e)))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ExtractError::Browser(format!("读取图片失败: {}", e)))?;
        tokio::fs::write(target, &bytes).await?;
        Ok(())
    }
}

#[async_trait]
impl Extractor for BrowserExtractor {
    async fn extract(
        &self,
        identifier: &str,
        options: &ExtractOptions,
        progress: ProgressSink<'_>,
    ) -> Result<ExtractionResult, ExtractError> {
        progress(ExtractProgress::new("navigating", format!("打开 {}", identifier)));
        self.executor.goto(identifier).await?;

        progress(ExtractProgress::new("extracting", "执行抽取脚本"));
        let page: PageExtraction = self.executor.eval_as(EXTRACT_SCRIPT).await?;

        if page.requires_login {
            return Err(ExtractError::AuthRequired(identifier.to_string()));
        }
        if page.items.is_empty() {
            return Err(ExtractError::NoResultsFound(identifier.to_string()));
        }
        info!("✓ 页面抽取到 {} 道题目", page.items.len());

        let mut items = page.items;
        let mut working_files = Vec::new();
        if options.download_media {
            progress(ExtractProgress::new("downloading_media", "下载图片"));
            self.download_images(&mut items, &options.work_dir, &mut working_files)
                .await?;
        }

        Ok(ExtractionResult {
            items,
            metadata: page.metadata,
            working_files,
        })
    }
}

/// 从 URL 推断图片扩展名，未知时用 png
fn image_extension(url: &str) -> &str {
    let path = url.split(|c: char| c == '?' || c == '#').next().unwrap_or(url);
    match path.rsplit_once('.') {
        Some((_, ext)) if matches!(ext, "png" | "jpg" | "jpeg" | "gif" | "webp" | "svg") => ext,
        _ => "png",
    }
}
