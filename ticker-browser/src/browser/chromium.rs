//! chromiumoxide-backed browser sessions.

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::layout::Point;
use chromiumoxide::{Browser, Page};
use futures::StreamExt;
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::session::{BrowserSession, PageHandle, SessionLauncher};
use crate::error::BrowserError;
use ticker_common::BrowserConfig;

/// Launches headless Chrome processes.
#[derive(Debug, Clone)]
pub struct ChromiumLauncher {
    config: BrowserConfig,
}

impl ChromiumLauncher {
    pub fn new(config: BrowserConfig) -> Self {
        Self { config }
    }

    fn launch_config(&self) -> Result<chromiumoxide::BrowserConfig, BrowserError> {
        let mut builder = chromiumoxide::BrowserConfig::builder()
            .window_size(self.config.viewport_width, self.config.viewport_height)
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions");

        if !self.config.headless {
            builder = builder.with_head();
        }
        if !self.config.sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(ref path) = self.config.chrome_path {
            builder = builder.chrome_executable(path);
        }
        for arg in &self.config.extra_args {
            builder = builder.arg(arg.as_str());
        }

        builder.build().map_err(BrowserError::LaunchFailed)
    }
}

#[async_trait]
impl SessionLauncher for ChromiumLauncher {
    async fn launch(&self) -> Result<Arc<dyn BrowserSession>, BrowserError> {
        let config = self.launch_config()?;
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?;

        // The CDP connection only makes progress while its handler is polled.
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "CDP handler stopped");
                    break;
                }
            }
        });

        info!("Started new Chrome instance");

        Ok(Arc::new(ChromiumSession {
            browser: RwLock::new(browser),
            handler: Mutex::new(Some(handler_task)),
        }))
    }
}

/// One running Chrome process and its CDP event loop.
pub struct ChromiumSession {
    browser: RwLock<Browser>,
    handler: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn new_page(&self) -> Result<Arc<dyn PageHandle>, BrowserError> {
        let page = self.browser.read().await.new_page("about:blank").await?;
        Ok(Arc::new(ChromiumPage { page }))
    }

    async fn probe(&self) -> Result<(), BrowserError> {
        self.browser
            .read()
            .await
            .version()
            .await
            .map(|_| ())
            .map_err(|e| BrowserError::ProbeFailed(e.to_string()))
    }

    async fn close(&self) -> Result<(), BrowserError> {
        let mut browser = self.browser.write().await;
        let closed = browser.close().await;
        if let Err(e) = browser.wait().await {
            warn!(error = %e, "Chrome process did not exit cleanly");
        }

        let handler = self
            .handler
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(task) = handler {
            task.abort();
        }

        closed.map(|_| ()).map_err(BrowserError::from)
    }
}

/// A chromiumoxide tab.
pub struct ChromiumPage {
    page: Page,
}

#[async_trait]
impl PageHandle for ChromiumPage {
    async fn goto(&self, url: &str) -> Result<(), BrowserError> {
        self.page
            .goto(url)
            .await
            .map_err(|e| BrowserError::NavigationFailed {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        self.page.wait_for_navigation().await?;
        Ok(())
    }

    async fn find_text(&self, selector: &str) -> Result<Option<String>, BrowserError> {
        // A missing node surfaces as a CDP error; the caller keeps polling.
        match self.page.find_element(selector).await {
            Ok(element) => Ok(element.inner_text().await?),
            Err(e) => {
                debug!(selector, error = %e, "Element not rendered");
                Ok(None)
            }
        }
    }

    async fn find_texts(&self, selector: &str) -> Result<Vec<String>, BrowserError> {
        let elements = match self.page.find_elements(selector).await {
            Ok(elements) => elements,
            Err(e) => {
                debug!(selector, error = %e, "Elements not rendered");
                return Ok(Vec::new());
            }
        };

        let mut texts = Vec::with_capacity(elements.len());
        for element in elements {
            texts.push(element.inner_text().await?.unwrap_or_default());
        }
        Ok(texts)
    }

    async fn evaluate(&self, script: &str) -> Result<(), BrowserError> {
        self.page
            .evaluate(script)
            .await
            .map(|_| ())
            .map_err(|e| BrowserError::Evaluation(e.to_string()))
    }

    async fn evaluate_on_new_document(&self, script: &str) -> Result<(), BrowserError> {
        self.page
            .evaluate_on_new_document(AddScriptToEvaluateOnNewDocumentParams::new(script))
            .await
            .map(|_| ())
            .map_err(|e| BrowserError::Evaluation(e.to_string()))
    }

    async fn set_user_agent(&self, user_agent: &str) -> Result<(), BrowserError> {
        self.page
            .set_user_agent(SetUserAgentOverrideParams::new(user_agent))
            .await?;
        Ok(())
    }

    async fn move_mouse(&self, x: f64, y: f64) -> Result<(), BrowserError> {
        self.page.move_mouse(Point::new(x, y)).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), BrowserError> {
        self.page.clone().close().await?;
        Ok(())
    }
}
