//! JS 执行器 - 基础设施层
//!
//! 持有唯一的 page 资源，只暴露"导航"和"执行 JS"的能力

use chromiumoxide::Page;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::error::ExtractError;

/// JS 执行器
///
/// 职责：
/// - 持有唯一的 Page 资源
/// - 暴露 goto() / eval() 能力
/// - 不认识题目和任务
pub struct JsExecutor {
    page: Page,
}

impl JsExecutor {
    /// 创建新的 JS 执行器
    pub fn new(page: Page) -> Self {
        Self { page }
    }

    /// 获取 page 的引用（用于其他操作）
    pub fn page(&self) -> &Page {
        &self.page
    }

    /// 导航到指定 URL 并等待页面加载完成
    pub async fn goto(&self, url: &str) -> Result<(), ExtractError> {
        debug!("导航到: {}", url);
        self.page
            .goto(url)
            .await
            .map_err(|e| ExtractError::Browser(format!("导航到 {} 失败: {}", url, e)))?;
        self.page
            .wait_for_navigation()
            .await
            .map_err(|e| ExtractError::Browser(format!("等待页面加载失败: {}", e)))?;
        Ok(())
    }

    /// 执行 JS 代码并返回 JSON 结果
    pub async fn eval(&self, js_code: impl Into<String>) -> Result<JsonValue, ExtractError> {
        let result = self
            .page
            .evaluate(js_code.into())
            .await
            .map_err(|e| ExtractError::Browser(format!("执行脚本失败: {}", e)))?;
        let json_value = result
            .into_value()
            .map_err(|e| ExtractError::Browser(format!("脚本返回值无法转换: {}", e)))?;
        Ok(json_value)
    }

    /// 执行 JS 代码并反序列化为指定类型
    pub async fn eval_as<T: DeserializeOwned>(
        &self,
        js_code: impl Into<String>,
    ) -> Result<T, ExtractError> {
        let json_value = self.eval(js_code).await?;
        let typed_value = serde_json::from_value(json_value)?;
        Ok(typed_value)
    }
}
