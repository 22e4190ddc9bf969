use crate::models::job::BatchSubmission;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;

/// 从 TOML 文件加载一个批量提交
///
/// ```toml
/// user_id = "u-1"
/// urls = ["https://example.com/prova/1", "source://3"]
///
/// [options]
/// delay_between_urls_ms = 2000
///
/// [configs."source://3"]
/// expected_items = 100
/// ```
pub async fn load_toml_to_submission(toml_file_path: &Path) -> Result<BatchSubmission> {
    let content = fs::read_to_string(toml_file_path)
        .await
        .with_context(|| format!("无法读取TOML文件: {}", toml_file_path.display()))?;

    parse_submission(&content)
        .with_context(|| format!("无法解析TOML文件: {}", toml_file_path.display()))
}

/// TOML 使用 snake_case，这里先转成 JSON 值再按 camelCase 模型反序列化
fn parse_submission(content: &str) -> Result<BatchSubmission> {
    let value: toml::Table = toml::from_str(content)?;
    let json = camelize(serde_json::to_value(value)?);
    Ok(serde_json::from_value(json)?)
}

fn camelize(value: serde_json::Value) -> serde_json::Value {
    use serde_json::Value;
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| {
                    // URL 作为 key 的配置表不能改名
                    let key = if k.contains("://") { k } else { snake_to_camel(&k) };
                    (key, camelize(v))
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(camelize).collect()),
        other => other,
    }
}

fn snake_to_camel(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut upper = false;
    for c in key.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

/// 从文件夹中加载所有 TOML 批量提交
pub async fn load_all_submissions(folder_path: &str) -> Result<Vec<(PathBuf, BatchSubmission)>> {
    let folder = PathBuf::from(folder_path);

    if !folder.exists() {
        anyhow::bail!("文件夹不存在: {}", folder_path);
    }

    let mut submissions = Vec::new();
    let mut entries = fs::read_dir(&folder)
        .await
        .with_context(|| format!("无法读取文件夹: {}", folder_path))?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            tracing::info!(
                "正在加载: {}",
                path.file_name().unwrap_or_default().to_string_lossy()
            );

            match load_toml_to_submission(&path).await {
                Ok(submission) => {
                    tracing::info!("成功加载 {} 个 URL", submission.urls.len());
                    submissions.push((path, submission));
                }
                Err(e) => {
                    tracing::warn!("加载文件失败 {}: {:#}", path.display(), e);
                }
            }
        }
    }

    submissions.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(submissions)
}
