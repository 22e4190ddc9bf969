//! 媒体处理阶段
//!
//! 上传题目引用的本地图片并替换为持久 URL。
//! 本地文件只在上传确认成功后删除；上传失败保留原引用和文件。

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

use crate::models::{ExtractionMetadata, QuestionItem};
use crate::services::extractor::is_source_handle;
use crate::services::media_uploader::object_key;
use crate::services::MediaUploader;
use crate::utils::naming::slugify;

/// 媒体处理统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MediaReport {
    pub uploaded: usize,
    pub failed: usize,
    pub references_replaced: usize,
}

/// 试卷代码末尾的轮次，例如 `ENAREENAMED2021R1` → `-r1`
fn round_suffix(code: &str) -> Option<String> {
    let prefix = code.trim_end_matches(|c: char| c.is_ascii_digit());
    let digits = &code[prefix.len()..];
    if digits.is_empty() || !prefix.ends_with(|c: char| c == 'R' || c == 'r') {
        return None;
    }
    Some(format!("-r{}", digits))
}

/// 计算媒体存放目录
///
/// - `source://` 句柄：`questions/<source>-<year>[-rN]`
/// - 其他：`questions/<exam name>-<year>`
/// - 信息不足：`questions/images`
pub fn media_folder(identifier: &str, metadata: &ExtractionMetadata) -> String {
    if is_source_handle(identifier) {
        if let (Some(source), Some(year)) = (metadata.exam_source.as_deref(), metadata.exam_year)
        {
            let source = slugify(source);
            if !source.is_empty() {
                let round = metadata
                    .exam_code
                    .as_deref()
                    .and_then(round_suffix)
                    .unwrap_or_default();
                return format!("questions/{}-{}{}", source, year, round);
            }
        }
    }

    if let (Some(name), Some(year)) = (metadata.exam_name.as_deref(), metadata.exam_year) {
        let name = slugify(name);
        if !name.is_empty() {
            return format!("questions/{}-{}", name, year);
        }
    }

    "questions/images".to_string()
}

fn is_local_reference(reference: &str) -> bool {
    !(reference.starts_with("http://")
        || reference.starts_with("https://")
        || reference.starts_with("data:"))
}

/// 上传本地图片并替换引用
///
/// 同一本地路径只上传一次。`scope` 区分同一目录下不同 URL 的同名文件。
pub async fn process_media(
    items: &mut [QuestionItem],
    uploader: &dyn MediaUploader,
    folder: &str,
    scope: &str,
    upload_timeout: Duration,
) -> MediaReport {
    let mut report = MediaReport::default();

    let local_paths: BTreeSet<String> = items
        .iter()
        .flat_map(|q| q.images.iter())
        .filter(|r| is_local_reference(r))
        .cloned()
        .collect();

    let mut uploaded: HashMap<String, String> = HashMap::new();
    for local in local_paths {
        let path = Path::new(&local);
        let key = object_key(folder, scope, path);
        match tokio::time::timeout(upload_timeout, uploader.upload(path, &key)).await {
            Ok(Ok(url)) => {
                debug!("图片已上传: {} → {}", local, url);
                report.uploaded += 1;
                if let Err(e) = tokio::fs::remove_file(path).await {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        warn!("⚠️ 删除本地图片失败 {}: {}", local, e);
                    }
                }
                uploaded.insert(local, url);
            }
            Ok(Err(e)) => {
                warn!("⚠️ 图片上传失败 {}: {}", local, e);
                report.failed += 1;
            }
            Err(_) => {
                warn!(
                    "⚠️ 图片上传超时 {} ({} 秒)",
                    local,
                    upload_timeout.as_secs()
                );
                report.failed += 1;
            }
        }
    }

    for item in items.iter_mut() {
        for reference in item.images.iter_mut() {
            if let Some(url) = uploaded.get(reference.as_str()) {
                *reference = url.clone();
                report.references_replaced += 1;
            }
        }
    }

    report
}
