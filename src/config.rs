use std::time::Duration;

/// 程序配置文件
#[derive(Clone, Debug)]
pub struct Config {
    // --- 队列 / 工作池 ---
    /// 同时执行的任务数量
    pub max_concurrent_jobs: usize,
    /// 默认的 URL 间隔（毫秒）
    pub default_delay_between_urls_ms: u64,
    /// 默认的最大尝试次数
    pub default_max_retries: u32,
    /// 重试退避基数（毫秒），第 n 次重试等待 base * 2^(n-1)
    pub retry_backoff_base_ms: u64,
    /// 任务租约时长（毫秒），超过未续约即视为卡死
    pub lock_duration_ms: u64,
    /// 心跳续约间隔（毫秒）
    pub heartbeat_interval_ms: u64,
    /// 卡死检查间隔（毫秒）
    pub stalled_check_interval_ms: u64,
    /// 允许卡死的次数，超过后任务失败
    pub max_stalled_count: u32,
    /// 维护（过期清理）间隔（毫秒）
    pub maintenance_interval_ms: u64,

    // --- 超时 ---
    pub extraction_timeout_secs: u64,
    pub enrichment_timeout_secs: u64,
    pub upload_timeout_secs: u64,
    pub draft_timeout_secs: u64,

    // --- 保留策略 ---
    pub completed_retention_secs: i64,
    pub completed_keep_count: usize,
    pub failed_retention_secs: i64,
    pub draft_retention_secs: i64,

    // --- 目录 ---
    /// 批量提交 TOML 文件存放目录
    pub submissions_folder: String,
    /// 每个 URL 的临时工作目录根
    pub work_dir: String,
    /// 最终归档 JSON 输出目录
    pub artifacts_dir: String,
    /// 草稿存放目录
    pub drafts_dir: String,
    /// 输出日志文件
    pub output_log_file: String,

    // --- 抽取 ---
    /// 浏览器调试端口
    pub browser_debug_port: u16,
    /// 浏览器初始页面
    pub target_url: String,
    /// `source://` 抽取命令
    pub source_command: String,
    pub source_email: Option<String>,
    pub source_password: Option<String>,
    /// 合法 URL 路径标记
    pub allowed_path_markers: Vec<String>,

    // --- LLM 配置 ---
    pub llm_api_base_url: String,
    pub llm_model_name: String,
    /// 分类使用的密钥
    pub llm_api_key: String,
    /// 改写使用的密钥（为空时回退到第一个）
    pub llm_api_key_2: String,
    /// 每批送入 LLM 的题目数量
    pub enrichment_batch_size: usize,

    // --- 对象存储 ---
    pub media_upload_base_url: String,
    pub media_public_base_url: String,
    pub media_upload_token: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 4,
            default_delay_between_urls_ms: 2000,
            default_max_retries: 3,
            retry_backoff_base_ms: 2000,
            lock_duration_ms: 600_000,
            heartbeat_interval_ms: 30_000,
            stalled_check_interval_ms: 300_000,
            max_stalled_count: 2,
            maintenance_interval_ms: 3_600_000,
            extraction_timeout_secs: 300,
            enrichment_timeout_secs: 600,
            upload_timeout_secs: 60,
            draft_timeout_secs: 30,
            completed_retention_secs: 7 * 24 * 60 * 60,
            completed_keep_count: 100,
            failed_retention_secs: 30 * 24 * 60 * 60,
            draft_retention_secs: 30 * 24 * 60 * 60,
            submissions_folder: "submissions".to_string(),
            work_dir: "output/work".to_string(),
            artifacts_dir: "output/processed".to_string(),
            drafts_dir: "output/drafts".to_string(),
            output_log_file: "output.txt".to_string(),
            browser_debug_port: 2001,
            target_url: "about:blank".to_string(),
            source_command: "npm run scrape:source --".to_string(),
            source_email: None,
            source_password: None,
            allowed_path_markers: vec![
                "/demo/".to_string(),
                "/questao/".to_string(),
                "/prova/".to_string(),
            ],
            llm_api_base_url: "https://api.openai.com/v1".to_string(),
            llm_model_name: "gpt-4o-mini".to_string(),
            llm_api_key: String::new(),
            llm_api_key_2: String::new(),
            enrichment_batch_size: 5,
            media_upload_base_url: "http://localhost:9000/questions".to_string(),
            media_public_base_url: "http://localhost:9000/questions".to_string(),
            media_upload_token: String::new(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            max_concurrent_jobs: env_parse("MAX_CONCURRENT_JOBS", default.max_concurrent_jobs),
            default_delay_between_urls_ms: env_parse("DELAY_BETWEEN_URLS_MS", default.default_delay_between_urls_ms),
            default_max_retries: env_parse("MAX_RETRIES", default.default_max_retries),
            retry_backoff_base_ms: env_parse("RETRY_BACKOFF_BASE_MS", default.retry_backoff_base_ms),
            lock_duration_ms: env_parse("LOCK_DURATION_MS", default.lock_duration_ms),
            heartbeat_interval_ms: env_parse("HEARTBEAT_INTERVAL_MS", default.heartbeat_interval_ms),
            stalled_check_interval_ms: env_parse("STALLED_CHECK_INTERVAL_MS", default.stalled_check_interval_ms),
            max_stalled_count: env_parse("MAX_STALLED_COUNT", default.max_stalled_count),
            maintenance_interval_ms: env_parse("MAINTENANCE_INTERVAL_MS", default.maintenance_interval_ms),
            extraction_timeout_secs: env_parse("EXTRACTION_TIMEOUT_SECS", default.extraction_timeout_secs),
            enrichment_timeout_secs: env_parse("ENRICHMENT_TIMEOUT_SECS", default.enrichment_timeout_secs),
            upload_timeout_secs: env_parse("UPLOAD_TIMEOUT_SECS", default.upload_timeout_secs),
            draft_timeout_secs: env_parse("DRAFT_TIMEOUT_SECS", default.draft_timeout_secs),
            completed_retention_secs: env_parse("COMPLETED_RETENTION_SECS", default.completed_retention_secs),
            completed_keep_count: env_parse("COMPLETED_KEEP_COUNT", default.completed_keep_count),
            failed_retention_secs: env_parse("FAILED_RETENTION_SECS", default.failed_retention_secs),
            draft_retention_secs: env_parse("DRAFT_RETENTION_SECS", default.draft_retention_secs),
            submissions_folder: std::env::var("SUBMISSIONS_FOLDER").unwrap_or(default.submissions_folder),
            work_dir: std::env::var("WORK_DIR").unwrap_or(default.work_dir),
            artifacts_dir: std::env::var("ARTIFACTS_DIR").unwrap_or(default.artifacts_dir),
            drafts_dir: std::env::var("DRAFTS_DIR").unwrap_or(default.drafts_dir),
            output_log_file: std::env::var("OUTPUT_LOG_FILE").unwrap_or(default.output_log_file),
            browser_debug_port: env_parse("BROWSER_DEBUG_PORT", default.browser_debug_port),
            target_url: std::env::var("TARGET_URL").unwrap_or(default.target_url),
            source_command: std::env::var("SOURCE_COMMAND").unwrap_or(default.source_command),
            source_email: std::env::var("SCRAPER_EMAIL").ok(),
            source_password: std::env::var("SCRAPER_PASSWORD").ok(),
            allowed_path_markers: std::env::var("ALLOWED_PATH_MARKERS")
                .ok()
                .map(|v| v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
                .unwrap_or(default.allowed_path_markers),
            llm_api_base_url: std::env::var("LLM_API_BASE_URL").unwrap_or(default.llm_api_base_url),
            llm_model_name: std::env::var("LLM_MODEL_NAME").unwrap_or(default.llm_model_name),
            llm_api_key: std::env::var("LLM_API_KEY").unwrap_or(default.llm_api_key),
            llm_api_key_2: std::env::var("LLM_API_KEY_2").unwrap_or(default.llm_api_key_2),
            enrichment_batch_size: env_parse("ENRICHMENT_BATCH_SIZE", default.enrichment_batch_size),
            media_upload_base_url: std::env::var("MEDIA_UPLOAD_BASE_URL").unwrap_or(default.media_upload_base_url),
            media_public_base_url: std::env::var("MEDIA_PUBLIC_BASE_URL").unwrap_or(default.media_public_base_url),
            media_upload_token: std::env::var("MEDIA_UPLOAD_TOKEN").unwrap_or(default.media_upload_token),
        }
    }

    /// 改写服务使用的密钥，未单独配置时与分类共用
    pub fn rewrite_api_key(&self) -> &str {
        if self.llm_api_key_2.is_empty() {
            &self.llm_api_key
        } else {
            &self.llm_api_key_2
        }
    }

    pub fn lock_duration(&self) -> Duration {
        Duration::from_millis(self.lock_duration_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn stalled_check_interval(&self) -> Duration {
        Duration::from_millis(self.stalled_check_interval_ms)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_millis(self.maintenance_interval_ms)
    }

    /// 第 `attempt` 次失败后的退避时间（attempt 从 1 开始）
    pub fn retry_backoff(&self, attempt: u32) -> Duration {
        backoff_delay(self.retry_backoff_base_ms, attempt)
    }
}

/// 指数退避：base * 2^(attempt-1)
pub fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
    Duration::from_millis(base_ms.saturating_mul(factor))
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        let config = Config::default();
        assert_eq!(config.retry_backoff(1), Duration::from_millis(2000));
        assert_eq!(config.retry_backoff(2), Duration::from_millis(4000));
        assert_eq!(config.retry_backoff(3), Duration::from_millis(8000));
    }

    #[test]
    fn rewrite_key_falls_back_to_primary() {
        let mut config = Config {
            llm_api_key: "key-1".to_string(),
            ..Config::default()
        };
        assert_eq!(config.rewrite_api_key(), "key-1");
        config.llm_api_key_2 = "key-2".to_string();
        assert_eq!(config.rewrite_api_key(), "key-2");
    }
}
