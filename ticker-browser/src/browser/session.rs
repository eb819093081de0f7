//! Browser session abstractions.
//!
//! A [`SessionLauncher`] starts browser processes, a [`BrowserSession`] is one
//! running process, and a [`PageHandle`] is one tab inside it. Everything is
//! object-safe so the pool can hold `Arc<dyn BrowserSession>` and tests can
//! substitute in-memory pages.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::BrowserError;

/// One open tab.
///
/// Lookups are single attempts; bounded waiting lives in [`super::wait`].
#[async_trait]
pub trait PageHandle: Send + Sync {
    /// Navigate and wait for the load event.
    async fn goto(&self, url: &str) -> Result<(), BrowserError>;

    /// Inner text of the first element matching `selector`, `None` if nothing matches yet.
    async fn find_text(&self, selector: &str) -> Result<Option<String>, BrowserError>;

    /// Inner text of every element matching `selector`, in document order.
    async fn find_texts(&self, selector: &str) -> Result<Vec<String>, BrowserError>;

    /// Run a script in the page context, discarding its result.
    async fn evaluate(&self, script: &str) -> Result<(), BrowserError>;

    /// Register a script that runs before any page script in every document
    /// this tab loads from now on.
    async fn evaluate_on_new_document(&self, script: &str) -> Result<(), BrowserError>;

    /// Override the user agent for subsequent requests from this tab.
    async fn set_user_agent(&self, user_agent: &str) -> Result<(), BrowserError>;

    /// Move the virtual mouse to viewport coordinates.
    async fn move_mouse(&self, x: f64, y: f64) -> Result<(), BrowserError>;

    /// Close the tab.
    async fn close(&self) -> Result<(), BrowserError>;
}

/// One browser process.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Open a blank tab.
    async fn new_page(&self) -> Result<Arc<dyn PageHandle>, BrowserError>;

    /// Cheap liveness check used by the health monitor.
    async fn probe(&self) -> Result<(), BrowserError>;

    /// Terminate the process. Called by the pool exactly once, never while borrowed.
    async fn close(&self) -> Result<(), BrowserError>;
}

/// Factory for browser processes.
#[async_trait]
pub trait SessionLauncher: Send + Sync {
    async fn launch(&self) -> Result<Arc<dyn BrowserSession>, BrowserError>;
}
