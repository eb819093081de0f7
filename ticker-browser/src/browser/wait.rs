//! Bounded waits over [`PageHandle`] lookups.

use std::time::Duration;
use tokio::time::{sleep, timeout};

use super::session::PageHandle;
use crate::error::BrowserError;

/// Delay between lookup attempts while an element has not rendered yet.
pub const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Navigate, failing with [`BrowserError::NavigationTimeout`] if the load
/// event does not arrive within `limit`.
pub async fn goto_within(
    page: &dyn PageHandle,
    url: &str,
    limit: Duration,
) -> Result<(), BrowserError> {
    match timeout(limit, page.goto(url)).await {
        Ok(result) => result,
        Err(_) => Err(BrowserError::NavigationTimeout {
            url: url.to_string(),
        }),
    }
}

/// Poll until `selector` matches, returning the trimmed text of the first match.
pub async fn wait_for_text(
    page: &dyn PageHandle,
    selector: &str,
    limit: Duration,
) -> Result<String, BrowserError> {
    let poll = async {
        loop {
            if let Some(text) = page.find_text(selector).await? {
                return Ok::<_, BrowserError>(text.trim().to_string());
            }
            sleep(POLL_INTERVAL).await;
        }
    };

    timeout(limit, poll)
        .await
        .unwrap_or_else(|_| Err(not_found(selector)))
}

/// Poll until `selector` matches at least one element, returning every match.
pub async fn wait_for_texts(
    page: &dyn PageHandle,
    selector: &str,
    limit: Duration,
) -> Result<Vec<String>, BrowserError> {
    let poll = async {
        loop {
            let texts = page.find_texts(selector).await?;
            if !texts.is_empty() {
                return Ok::<_, BrowserError>(
                    texts.into_iter().map(|t| t.trim().to_string()).collect(),
                );
            }
            sleep(POLL_INTERVAL).await;
        }
    };

    timeout(limit, poll)
        .await
        .unwrap_or_else(|_| Err(not_found(selector)))
}

fn not_found(selector: &str) -> BrowserError {
    BrowserError::ElementNotFound {
        selector: selector.to_string(),
    }
}
