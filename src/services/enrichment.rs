//! AI 增强能力：分类与改写
//!
//! 两个能力各自持有一个 `LlmService`（各自的密钥），
//! 由流程层并发调用，互不影响。

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::ServiceError;
use crate::models::{CategorizationResult, EnrichmentContext, QuestionItem, RewriteResult};
use crate::services::LlmService;

/// 分类器
#[async_trait]
pub trait Categorizer: Send + Sync {
    async fn categorize_batch(
        &self,
        items: &[QuestionItem],
    ) -> Result<Vec<CategorizationResult>, ServiceError>;
}

/// 评论改写器
#[async_trait]
pub trait Rewriter: Send + Sync {
    async fn rewrite_batch(
        &self,
        items: &[QuestionItem],
        context: &EnrichmentContext,
    ) -> Result<Vec<RewriteResult>, ServiceError>;
}

const CATEGORIZE_SYSTEM: &str = "Você é um especialista em educação médica. \
Classifique cada questão nas áreas e subáreas médicas pertinentes. \
Responda somente com um array JSON no formato [{\"itemId\": \"...\", \"tags\": [\"...\"]}].";

const REWRITE_SYSTEM: &str = "Você é um professor de medicina que escreve comentários didáticos \
para questões de prova. Reescreva o comentário de cada questão com suas próprias palavras, \
explicando a alternativa correta e citando a prova quando informada. \
Responda somente com um array JSON no formato [{\"itemId\": \"...\", \"rewrittenText\": \"...\"}].";

/// 分批执行，单批失败只记录警告；全部失败时返回最后一个错误
async fn run_batches<T, F, Fut>(
    label: &str,
    items: &[QuestionItem],
    batch_size: usize,
    mut call: F,
) -> Result<Vec<T>, ServiceError>
where
    F: FnMut(Vec<QuestionItem>) -> Fut,
    Fut: std::future::Future<Output = Result<Vec<T>, ServiceError>>,
{
    let mut results = Vec::new();
    let mut last_error = None;
    let mut succeeded = 0;

    let batches: Vec<Vec<QuestionItem>> = items
        .chunks(batch_size.max(1))
        .map(|chunk| chunk.to_vec())
        .collect();
    let total_batches = batches.len();

    for (idx, batch) in batches.into_iter().enumerate() {
        debug!("{} 批次 {}/{}", label, idx + 1, total_batches);
        match call(batch).await {
            Ok(mut batch_results) => {
                succeeded += 1;
                results.append(&mut batch_results);
            }
            Err(e) => {
                warn!("⚠️ {} 批次 {}/{} 失败: {}", label, idx + 1, total_batches, e);
                last_error = Some(e);
            }
        }
    }

    match last_error {
        Some(e) if succeeded == 0 => Err(e),
        _ => Ok(results),
    }
}

/// 基于 LLM 的分类器
pub struct LlmCategorizer {
    llm: Arc<LlmService>,
    batch_size: usize,
}

impl LlmCategorizer {
    pub fn new(llm: Arc<LlmService>, batch_size: usize) -> Self {
        Self { llm, batch_size }
    }

    pub fn from_config(config: &Config) -> Self {
        let llm = LlmService::new(
            &config.llm_api_base_url,
            &config.llm_api_key,
            &config.llm_model_name,
        );
        Self::new(Arc::new(llm), config.enrichment_batch_size)
    }
}

#[async_trait]
impl Categorizer for LlmCategorizer {
    async fn categorize_batch(
        &self,
        items: &[QuestionItem],
    ) -> Result<Vec<CategorizationResult>, ServiceError> {
        info!("🏷️ 分类 {} 道题目 (模型: {})", items.len(), self.llm.model_name());
        run_batches("分类", items, self.batch_size, |batch| async move {
            let payload: Vec<_> = batch
                .iter()
                .map(|q| {
                    json!({
                        "itemId": q.temp_id,
                        "statement": q.statement,
                        "alternatives": q.alternatives,
                    })
                })
                .collect();
            let user_message = format!(
                "Classifique as questões abaixo:\n{}",
                serde_json::to_string_pretty(&payload)?
            );
            self.llm
                .ask_json_array(&user_message, CATEGORIZE_SYSTEM)
                .await
        })
        .await
    }
}

/// 基于 LLM 的评论改写器
pub struct LlmRewriter {
    llm: Arc<LlmService>,
    batch_size: usize,
}

impl LlmRewriter {
    pub fn new(llm: Arc<LlmService>, batch_size: usize) -> Self {
        Self { llm, batch_size }
    }

    /// 使用第二个密钥，避免和分类共享限流
    pub fn from_config(config: &Config) -> Self {
        let llm = LlmService::new(
            &config.llm_api_base_url,
            config.rewrite_api_key(),
            &config.llm_model_name,
        );
        Self::new(Arc::new(llm), config.enrichment_batch_size)
    }
}

#[async_trait]
impl Rewriter for LlmRewriter {
    async fn rewrite_batch(
        &self,
        items: &[QuestionItem],
        context: &EnrichmentContext,
    ) -> Result<Vec<RewriteResult>, ServiceError> {
        // 没有原始评论的题目不需要改写
        let with_comment: Vec<QuestionItem> =
            items.iter().filter(|q| q.has_comment()).cloned().collect();
        if with_comment.is_empty() {
            return Ok(Vec::new());
        }

        info!(
            "✍️ 改写 {} 条评论 (模型: {})",
            with_comment.len(),
            self.llm.model_name()
        );
        let context_json = serde_json::to_string(context)?;
        run_batches("改写", &with_comment, self.batch_size, |batch| {
            let context_json = context_json.clone();
            async move {
                let payload: Vec<_> = batch
                    .iter()
                    .map(|q| {
                        json!({
                            "itemId": q.temp_id,
                            "number": q.number,
                            "statement": q.statement,
                            "alternatives": q.alternatives,
                            "correct": q.correct,
                            "comment": q.comment,
                        })
                    })
                    .collect();
                let user_message = format!(
                    "Prova: {}\nQuestões:\n{}",
                    context_json,
                    serde_json::to_string_pretty(&payload)?
                );
                self.llm.ask_json_array(&user_message, REWRITE_SYSTEM).await
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExtractedItem;

    fn items(n: usize) -> Vec<QuestionItem> {
        (0..n)
            .map(|i| QuestionItem::from_extracted(ExtractedItem::default(), format!("t{}", i), i))
            .collect()
    }

    #[tokio::test]
    async fn batches_are_sized_and_failures_are_skipped() {
        let items = items(12);
        let mut sizes = Vec::new();
        let result = run_batches("测试", &items, 5, |batch| {
            sizes.push(batch.len());
            let ids: Vec<String> = batch.iter().map(|q| q.temp_id.clone()).collect();
            async move {
                if ids.contains(&"t5".to_string()) {
                    Err(ServiceError::ResponseParse("boom".into()))
                } else {
                    Ok(ids)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(sizes, vec![5, 5, 2]);
        assert_eq!(result.len(), 7);
    }

    #[tokio::test]
    async fn all_batches_failing_is_an_error() {
        let items = items(3);
        let result: Result<Vec<String>, _> = run_batches("测试", &items, 2, |_| async {
            Err(ServiceError::Timeout { secs: 1 })
        })
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn empty_input_yields_empty_output() {
        let result: Vec<String> = run_batches("测试", &[], 5, |_| async { Ok(vec!["x".into()]) })
            .await
            .unwrap();
        assert!(result.is_empty());
    }
}
