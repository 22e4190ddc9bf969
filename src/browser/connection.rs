use anyhow::{Context, Result};
use chromiumoxide::{Browser, Page};
use futures::StreamExt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::infrastructure::JsExecutor;

/// 已连接的浏览器会话
///
/// 持有 Browser 和事件处理任务，drop 时停止事件处理。
pub struct BrowserSession {
    _browser: Browser,
    executor: Arc<JsExecutor>,
    handler: JoinHandle<()>,
}

impl BrowserSession {
    /// 连接到已经以调试端口启动的浏览器
    pub async fn connect(port: u16, initial_url: &str) -> Result<Self> {
        let browser_url = format!("http://localhost:{}", port);
        info!("正在连接到浏览器: {}", browser_url);

        let (browser, mut handler) = Browser::connect(&browser_url)
            .await
            .with_context(|| format!("连接浏览器失败: {}", browser_url))?;
        debug!("浏览器连接成功");

        // 在后台处理浏览器事件
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    warn!("浏览器事件处理结束: {}", e);
                    break;
                }
            }
        });

        // 等待浏览器状态同步
        sleep(tokio::time::Duration::from_millis(300)).await;

        let page = open_page(&browser, initial_url).await?;
        Ok(Self {
            _browser: browser,
            executor: Arc::new(JsExecutor::new(page)),
            handler,
        })
    }

    /// 抽取使用的执行器（全局只有一个 page）
    pub fn executor(&self) -> Arc<JsExecutor> {
        self.executor.clone()
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

/// 复用已有的空白页，没有则新建
async fn open_page(browser: &Browser, initial_url: &str) -> Result<Page> {
    let pages = browser.pages().await.context("获取页面列表失败")?;
    debug!("获取到 {} 个页面", pages.len());

    for page in pages {
        if let Ok(Some(url)) = page.url().await {
            if url == "about:blank" || url == initial_url {
                info!("✓ 复用已有页面: {}", url);
                return Ok(page);
            }
        }
    }

    let page = browser
        .new_page(initial_url)
        .await
        .with_context(|| format!("创建新页面失败: {}", initial_url))?;
    info!("已打开新页面: {}", initial_url);
    Ok(page)
}
