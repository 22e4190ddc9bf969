//! LLM 服务 - 业务能力层
//!
//! 只负责"调用 LLM"能力，不关心流程
//!
//! ## 技术栈
//! - 使用 `async-openai` crate 进行 API 调用
//! - 支持自定义 API 端点和模型
//! - 兼容 OpenAI API 的服务

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    },
    Client,
};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::ServiceError;

/// LLM 服务
///
/// 职责：
/// - 提供通用的 LLM 调用接口
/// - 容错解析 JSON 响应
/// - 不认识任务和 URL
pub struct LlmService {
    client: Client<OpenAIConfig>,
    model_name: String,
}

impl LlmService {
    /// 创建新的 LLM 服务，每个实例使用自己的密钥
    pub fn new(api_base_url: &str, api_key: &str, model_name: &str) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(api_base_url);

        Self {
            client: Client::with_config(openai_config),
            model_name: model_name.to_string(),
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    fn llm_error(&self, e: impl std::fmt::Display) -> ServiceError {
        ServiceError::Llm {
            model: self.model_name.clone(),
            message: e.to_string(),
        }
    }

    /// 通用的 LLM 调用函数
    ///
    /// 其他所有 LLM 相关功能都基于此函数。
    pub async fn send_to_llm(
        &self,
        user_message: &str,
        system_message: Option<&str>,
    ) -> Result<String, ServiceError> {
        debug!("调用 LLM API，模型: {}", self.model_name);
        debug!("用户消息长度: {} 字符", user_message.len());

        let mut messages = Vec::new();

        if let Some(sys_msg) = system_message {
            let system_msg = ChatCompletionRequestSystemMessageArgs::default()
                .content(sys_msg)
                .build()
                .map_err(|e| self.llm_error(e))?;
            messages.push(ChatCompletionRequestMessage::System(system_msg));
        }

        let user_msg = ChatCompletionRequestUserMessageArgs::default()
            .content(user_message)
            .build()
            .map_err(|e| self.llm_error(e))?;
        messages.push(ChatCompletionRequestMessage::User(user_msg));

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model_name)
            .messages(messages)
            .temperature(0.3)
            .max_tokens(4096u32)
            .build()
            .map_err(|e| self.llm_error(e))?;

        let response = self.client.chat().create(request).await.map_err(|e| {
            warn!("LLM API 调用失败: {}", e);
            self.llm_error(e)
        })?;

        debug!("LLM API 调用成功");

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| ServiceError::ResponseParse("LLM 返回内容为空".to_string()))?;

        Ok(content.trim().to_string())
    }

    /// 调用 LLM 并把响应解析为 JSON 数组
    pub async fn ask_json_array<T: DeserializeOwned>(
        &self,
        user_message: &str,
        system_message: &str,
    ) -> Result<Vec<T>, ServiceError> {
        let response = self.send_to_llm(user_message, Some(system_message)).await?;
        parse_json_array(&response)
    }
}

/// 从 LLM 响应中提取 JSON 数组
///
/// 兼容 ```json 代码块、前后多余说明文字，以及 `{"results": [...]}` 包装。
pub fn parse_json_array<T: DeserializeOwned>(response: &str) -> Result<Vec<T>, ServiceError> {
    let cleaned = strip_code_fence(response.trim());

    if let Ok(items) = serde_json::from_str::<Vec<T>>(cleaned) {
        return Ok(items);
    }

    if let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(cleaned)
    {
        if let Some(array) = map.values().find(|v| v.is_array()) {
            return serde_json::from_value(array.clone()).map_err(ServiceError::from);
        }
    }

    match (cleaned.find('['), cleaned.rfind(']')) {
        (Some(start), Some(end)) if start < end => {
            serde_json::from_str(&cleaned[start..=end]).map_err(|e| {
                ServiceError::ResponseParse(format!("{}: {}", e, truncate(cleaned, 200)))
            })
        }
        _ => Err(ServiceError::ResponseParse(format!(
            "响应中没有 JSON 数组: {}",
            truncate(cleaned, 200)
        ))),
    }
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn truncate(text: &str, max_len: usize) -> String {
    text.chars().take(max_len).collect()
}
