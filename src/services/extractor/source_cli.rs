//! `source://N` 抽取器
//!
//! 调用外部抓取命令，实时转发 `[info]` 日志为进度，
//! 从输出中找到 `Output file: xxx.json` 并读取题目。

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{parse_source_index, ExtractOptions, ExtractProgress, Extractor, ProgressSink};
use crate::config::Config;
use crate::error::ExtractError;
use crate::models::{ExtractedItem, ExtractionMetadata, ExtractionResult};

/// 抓取命令输出的单道题目
#[derive(Debug, Default, Deserialize)]
struct CliQuestion {
    #[serde(default, alias = "numero")]
    number: Option<JsonValue>,
    #[serde(default, alias = "enunciado")]
    statement: String,
    #[serde(default)]
    alternatives: Vec<JsonValue>,
    #[serde(default)]
    correct_alternative_id: Option<JsonValue>,
    #[serde(default, alias = "explicacao")]
    explanation: String,
    #[serde(default, alias = "comentario")]
    comment: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    image_urls: Vec<String>,
    #[serde(default, alias = "anulada")]
    annulled: bool,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    year: Option<i32>,
    #[serde(default)]
    metadata: Option<CliQuestionMetadata>,
}

#[derive(Debug, Default, Deserialize)]
struct CliQuestionMetadata {
    #[serde(default)]
    prova_codigo: Option<String>,
}

impl CliQuestion {
    fn into_item(self) -> ExtractedItem {
        let number = self.number.map(|n| match n {
            JsonValue::String(s) => s,
            other => other.to_string(),
        });

        let mut correct = None;
        let mut alternatives = Vec::with_capacity(self.alternatives.len());
        for (idx, alt) in self.alternatives.into_iter().enumerate() {
            match alt {
                JsonValue::String(text) => alternatives.push(text),
                JsonValue::Object(map) => {
                    let text = map
                        .get("text")
                        .or_else(|| map.get("texto"))
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string();
                    if let (Some(id), Some(correct_id)) =
                        (map.get("id"), self.correct_alternative_id.as_ref())
                    {
                        if id == correct_id {
                            correct = Some(idx);
                        }
                    }
                    alternatives.push(text);
                }
                other => alternatives.push(other.to_string()),
            }
        }

        ExtractedItem {
            number,
            statement: self.statement,
            alternatives,
            correct,
            explanation: self.explanation,
            comment: self.comment,
            tags: self.tags,
            images: self.image_urls,
            annulled: self.annulled,
        }
    }
}

/// 外部抓取命令抽取器
pub struct SourceCliExtractor {
    program: String,
    base_args: Vec<String>,
    email: Option<String>,
    password: Option<String>,
    output_file_pattern: Regex,
}

impl SourceCliExtractor {
    pub fn new(config: &Config) -> Result<Self, ExtractError> {
        let mut parts = config.source_command.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| ExtractError::Process("抓取命令为空".to_string()))?;
        Ok(Self {
            program,
            base_args: parts.collect(),
            email: config.source_email.clone(),
            password: config.source_password.clone(),
            output_file_pattern: Regex::new(r"Output file: (.+\.json)")
                .map_err(|e| ExtractError::Process(e.to_string()))?,
        })
    }

    fn build_args(&self, index: usize, options: &ExtractOptions) -> Vec<String> {
        let mut args = self.base_args.clone();
        if let Some(email) = &self.email {
            args.extend(["-e".to_string(), email.clone()]);
        }
        if let Some(password) = &self.password {
            args.extend(["-p".to_string(), password.clone()]);
        }
        args.extend([
            "--source-index".to_string(),
            (index + 1).to_string(),
            "--limit".to_string(),
            "0".to_string(),
            "--output-dir".to_string(),
            options.work_dir.to_string_lossy().into_owned(),
        ]);
        args
    }

    /// 运行命令，返回完整 stdout
    async fn run(
        &self,
        args: Vec<String>,
        progress: ProgressSink<'_>,
    ) -> Result<String, ExtractError> {
        let mut child = Command::new(&self.program)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExtractError::Process(format!("无法启动 {}: {}", self.program, e)))?;

        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = String::new();
                let _ = stderr.read_to_string(&mut buf).await;
                buf
            })
        });

        let mut stdout_text = String::new();
        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await? {
                if let Some(message) = info_message(&line) {
                    progress(ExtractProgress::new("extracting", message));
                }
                stdout_text.push_str(&line);
                stdout_text.push('\n');
            }
        }

        let status = child.wait().await?;
        let stderr_text = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        if !status.success() {
            let message = if stderr_text.trim().is_empty() {
                format!("抓取命令退出码 {:?}", status.code())
            } else {
                stderr_text.trim().to_string()
            };
            if message.to_lowercase().contains("login") {
                return Err(ExtractError::AuthRequired(message));
            }
            return Err(ExtractError::Process(message));
        }
        if !stderr_text.trim().is_empty() {
            debug!("抓取命令 stderr: {}", stderr_text.trim());
        }
        Ok(stdout_text)
    }

    fn find_output_file(&self, stdout: &str) -> Option<PathBuf> {
        self.output_file_pattern
            .captures(stdout)
            .and_then(|c| c.get(1))
            .map(|m| PathBuf::from(m.as_str().trim()))
    }
}

#[async_trait]
impl Extractor for SourceCliExtractor {
    async fn extract(
        &self,
        identifier: &str,
        options: &ExtractOptions,
        progress: ProgressSink<'_>,
    ) -> Result<ExtractionResult, ExtractError> {
        let index = parse_source_index(identifier)
            .ok_or_else(|| ExtractError::Process(format!("无效的来源句柄: {}", identifier)))?;
        tokio::fs::create_dir_all(&options.work_dir).await?;

        info!("🔧 执行抓取命令，来源序号 {}", index);
        let args = self.build_args(index, options);
        let stdout = tokio::time::timeout(
            Duration::from_secs(options.timeout_secs),
            self.run(args, progress),
        )
        .await
        .map_err(|_| ExtractError::Timeout {
            secs: options.timeout_secs,
        })??;

        let output_file = self.find_output_file(&stdout).ok_or_else(|| {
            ExtractError::Process("抓取命令输出中没有找到结果文件".to_string())
        })?;
        debug!("读取抓取结果: {}", output_file.display());

        let content = tokio::fs::read_to_string(&output_file).await?;
        let questions: Vec<CliQuestion> = serde_json::from_str(&content)?;
        if questions.is_empty() {
            warn!("⚠️ 抓取结果为空: {}", output_file.display());
            return Err(ExtractError::NoResultsFound(identifier.to_string()));
        }

        let metadata = metadata_from_first(&questions);
        let items = questions.into_iter().map(CliQuestion::into_item).collect();

        Ok(ExtractionResult {
            items,
            metadata,
            working_files: vec![output_file],
        })
    }
}

/// 从第一道题读取试卷信息，试卷名形如 `<code> (<source> <year>)`
fn metadata_from_first(questions: &[CliQuestion]) -> ExtractionMetadata {
    let Some(first) = questions.first() else {
        return ExtractionMetadata::default();
    };
    let exam_code = first
        .metadata
        .as_ref()
        .and_then(|m| m.prova_codigo.clone());
    let exam_name = exam_code.as_ref().map(|code| {
        format!(
            "{} ({} {})",
            code,
            first.source.as_deref().unwrap_or("Desconhecido"),
            first.year.map(|y| y.to_string()).unwrap_or_default()
        )
        .replace(" )", ")")
    });

    ExtractionMetadata {
        exam_name,
        exam_year: first.year,
        exam_source: first.source.clone(),
        exam_code,
        expected_total: None,
    }
}

/// 提取 `[info]` 之后的消息
fn info_message(line: &str) -> Option<String> {
    let (_, rest) = line.split_once("[info]")?;
    let message = rest.trim();
    (!message.is_empty()).then(|| message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> SourceCliExtractor {
        let config = Config {
            source_command: "npm run scrape:source --".to_string(),
            source_email: Some("a@b.test".to_string()),
            source_password: None,
            ..Config::default()
        };
        SourceCliExtractor::new(&config).unwrap()
    }

    #[test]
    fn builds_one_based_index_args() {
        let options = ExtractOptions {
            timeout_secs: 1,
            download_media: false,
            work_dir: PathBuf::from("/tmp/w"),
        };
        let args = extractor().build_args(2, &options);
        assert_eq!(&args[..3], &["run", "scrape:source", "--"]);
        let idx = args.iter().position(|a| a == "--source-index").unwrap();
        assert_eq!(args[idx + 1], "3");
        assert!(args.contains(&"-e".to_string()));
        assert!(!args.contains(&"-p".to_string()));
    }

    #[test]
    fn finds_output_file_and_info_lines() {
        let stdout = "2024 [info] Página 1 de 3\nOutput file: /tmp/out/prova-1.json\n";
        assert_eq!(
            extractor().find_output_file(stdout),
            Some(PathBuf::from("/tmp/out/prova-1.json"))
        );
        assert_eq!(info_message("x [info]  Página 1 "), Some("Página 1".to_string()));
        assert_eq!(info_message("x [info]   "), None);
        assert_eq!(info_message("no marker"), None);
    }

    #[test]
    fn maps_cli_questions_and_exam_name() {
        let json = r#"[{
            "number": 1,
            "statement": "Paciente de 30 anos",
            "alternatives": [{"id": "a", "text": "A"}, {"id": "b", "text": "B"}],
            "correct_alternative_id": "b",
            "image_urls": ["/tmp/w/img.png"],
            "source": "ENARE",
            "year": 2021,
            "metadata": {"prova_codigo": "ENARE2021R1"}
        }]"#;
        let questions: Vec<CliQuestion> = serde_json::from_str(json).unwrap();
        let meta = metadata_from_first(&questions);
        assert_eq!(meta.exam_name.as_deref(), Some("ENARE2021R1 (ENARE 2021)"));
        assert_eq!(meta.exam_year, Some(2021));

        let item = questions.into_iter().next().unwrap().into_item();
        assert_eq!(item.number.as_deref(), Some("1"));
        assert_eq!(item.alternatives, vec!["A".to_string(), "B".to_string()]);
        assert_eq!(item.correct, Some(1));
    }
}
