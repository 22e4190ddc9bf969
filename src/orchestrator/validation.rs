//! 提交校验
//!
//! 在进入队列之前拒绝不合法的输入，校验失败的提交不会创建任何任务。

use reqwest::Url;
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::models::BatchSubmission;
use crate::services::extractor::{is_source_handle, parse_source_index};

/// 校验整个提交
pub fn validate_submission(submission: &BatchSubmission, config: &Config) -> AppResult<()> {
    if submission.user_id.trim().is_empty() {
        return Err(AppError::Validation("userId 不能为空".to_string()));
    }
    if submission.urls.is_empty() {
        return Err(AppError::Validation("urls 不能为空".to_string()));
    }

    let mut seen = HashSet::new();
    for url in &submission.urls {
        validate_identifier(url, &config.allowed_path_markers)
            .map_err(|reason| AppError::Validation(format!("{}: {}", url, reason)))?;
        // configs 按 URL 索引，重复的 URL 无法区分
        if !seen.insert(url.as_str()) {
            return Err(AppError::Validation(format!("{}: URL 重复", url)));
        }
    }

    for url in submission.configs.keys() {
        if !submission.urls.contains(url) {
            return Err(AppError::Validation(format!(
                "configs 中的 {} 不在 urls 列表里",
                url
            )));
        }
    }
    Ok(())
}

/// 校验单个标识：`source://N` 或者指向允许路径的公网 http(s) URL
pub fn validate_identifier(identifier: &str, path_markers: &[String]) -> Result<(), String> {
    if is_source_handle(identifier) {
        return parse_source_index(identifier)
            .map(|_| ())
            .ok_or_else(|| "source:// 后必须是数字下标".to_string());
    }

    let url = Url::parse(identifier).map_err(|e| format!("无法解析 URL ({})", e))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("不支持的协议 {}", url.scheme()));
    }

    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| "缺少主机名".to_string())?;
    if is_internal_host(host) {
        return Err(format!("不允许访问内部地址 {}", host));
    }

    let path = url.path();
    if !path_markers.is_empty() && !path_markers.iter().any(|m| path.contains(m.as_str())) {
        return Err(format!("路径必须包含 {}", path_markers.join(" / ")));
    }
    Ok(())
}

fn is_internal_host(host: &str) -> bool {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    let lower = host.to_ascii_lowercase();
    if lower == "localhost" || lower.ends_with(".localhost") || lower.ends_with(".local") {
        return true;
    }
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => is_internal_v4(ip),
        Ok(IpAddr::V6(ip)) => is_internal_v6(ip),
        Err(_) => false,
    }
}

fn is_internal_v4(ip: Ipv4Addr) -> bool {
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        // 100.64.0.0/10
        || (ip.octets()[0] == 100 && (ip.octets()[1] & 0xc0) == 64)
}

fn is_internal_v6(ip: Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_internal_v4(v4);
    }
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        // fc00::/7
        || (first & 0xfe00) == 0xfc00
        // fe80::/10
        || (first & 0xffc0) == 0xfe80
}
