use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 抽取器返回的原始题目
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<String>,
    #[serde(default)]
    pub statement: String,
    #[serde(default)]
    pub alternatives: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct: Option<usize>,
    #[serde(default)]
    pub explanation: String,
    /// 原始解析/评论，改写阶段会替换
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// 图片引用：本地路径或远程 URL
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub annulled: bool,
}

/// 抽取元数据
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exam_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exam_year: Option<i32>,
    /// 来源机构，例如 "ENARE/ENAMED"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exam_source: Option<String>,
    /// 试卷代码，例如 "ENAREENAMED2021R1"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exam_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_total: Option<u32>,
}

/// 抽取结果
#[derive(Debug, Clone, Default)]
pub struct ExtractionResult {
    pub items: Vec<ExtractedItem>,
    pub metadata: ExtractionMetadata,
    /// 本次抽取创建的临时文件（清理阶段只删除这些）
    pub working_files: Vec<PathBuf>,
}

/// 流水线内部使用的题目，带临时关联 ID
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionItem {
    /// 临时关联 ID，合并分类/改写结果时按此匹配
    pub temp_id: String,
    pub number: String,
    pub statement: String,
    pub alternatives: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct: Option<usize>,
    pub explanation: String,
    pub comment: String,
    pub tags: Vec<String>,
    /// 分类阶段写入的标签
    pub category_tags: Vec<String>,
    pub images: Vec<String>,
    pub annulled: bool,
}

impl QuestionItem {
    pub fn from_extracted(item: ExtractedItem, temp_id: String, index: usize) -> Self {
        let mut tags = item.tags;
        if !tags.iter().any(|t| t == "scraper") {
            tags.push("scraper".to_string());
        }
        Self {
            temp_id,
            number: item.number.unwrap_or_else(|| format!("Q{}", index + 1)),
            statement: item.statement,
            alternatives: item.alternatives,
            correct: item.correct,
            explanation: item.explanation,
            comment: item.comment,
            tags,
            category_tags: Vec::new(),
            images: item.images,
            annulled: item.annulled,
        }
    }

    pub fn has_comment(&self) -> bool {
        !self.comment.trim().is_empty()
    }
}

/// 分类结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategorizationResult {
    #[serde(alias = "item_id", alias = "questionId")]
    pub item_id: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// 改写结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewriteResult {
    #[serde(alias = "item_id", alias = "questionId")]
    pub item_id: String,
    #[serde(alias = "rewritten_text", alias = "rewrittenComment")]
    pub rewritten_text: String,
}

/// 改写时传给 LLM 的试卷上下文
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentContext {
    pub source: Option<String>,
    pub year: Option<i32>,
    pub exam_code: Option<String>,
    pub exam_name: Option<String>,
}

impl From<&ExtractionMetadata> for EnrichmentContext {
    fn from(meta: &ExtractionMetadata) -> Self {
        Self {
            source: meta.exam_source.clone(),
            year: meta.exam_year,
            exam_code: meta.exam_code.clone(),
            exam_name: meta.exam_name.clone(),
        }
    }
}

/// 草稿统计信息
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftMetadata {
    pub url: String,
    pub exam_name: Option<String>,
    pub total_items: usize,
    pub categorized_items: usize,
    pub extraction_duration_ms: u64,
    pub comments_generated: usize,
    pub comments_missing: usize,
    pub missing_comment_items: Vec<String>,
    pub annulled_items: usize,
    pub annulled_item_numbers: Vec<String>,
}

/// 待审核草稿
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Draft {
    pub job_id: String,
    pub url: String,
    pub title: String,
    pub items: Vec<QuestionItem>,
    pub categorization: Vec<CategorizationResult>,
    pub metadata: DraftMetadata,
    pub created_at: DateTime<Utc>,
}

impl Draft {
    /// 根据题目计算评论和作废统计
    pub fn build(
        job_id: &str,
        url: &str,
        title: String,
        items: Vec<QuestionItem>,
        categorization: Vec<CategorizationResult>,
        exam_name: Option<String>,
        extraction_duration_ms: u64,
    ) -> Self {
        let missing_comment_items: Vec<String> = items
            .iter()
            .filter(|q| !q.has_comment())
            .map(|q| q.number.clone())
            .collect();
        let annulled_item_numbers: Vec<String> = items
            .iter()
            .filter(|q| q.annulled)
            .map(|q| q.number.clone())
            .collect();

        let metadata = DraftMetadata {
            url: url.to_string(),
            exam_name,
            total_items: items.len(),
            categorized_items: categorization.len(),
            extraction_duration_ms,
            comments_generated: items.len() - missing_comment_items.len(),
            comments_missing: missing_comment_items.len(),
            missing_comment_items,
            annulled_items: annulled_item_numbers.len(),
            annulled_item_numbers,
        };

        Self {
            job_id: job_id.to_string(),
            url: url.to_string(),
            title,
            items,
            categorization,
            metadata,
            created_at: Utc::now(),
        }
    }
}
