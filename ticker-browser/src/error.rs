//! Error types for ticker-browser.

/// Browser pool and page errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BrowserError {
    #[error("Browser launch failed: {0}")]
    LaunchFailed(String),

    #[error("Browser pool is shut down")]
    PoolClosed,

    #[error("Navigation failed for {url}: {reason}")]
    NavigationFailed { url: String, reason: String },

    #[error("Navigation timeout: {url}")]
    NavigationTimeout { url: String },

    #[error("Element not found: {selector}")]
    ElementNotFound { selector: String },

    #[error("Script evaluation failed: {0}")]
    Evaluation(String),

    #[error("Health probe failed: {0}")]
    ProbeFailed(String),

    #[error("CDP error: {0}")]
    Cdp(String),
}

impl BrowserError {
    /// Element lookups and navigations that ran out of time.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::NavigationTimeout { .. } | Self::ElementNotFound { .. }
        )
    }
}

impl From<chromiumoxide::error::CdpError> for BrowserError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        Self::Cdp(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BrowserError::ElementNotFound {
            selector: "span[data-testid='qsp-price']".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Element not found: span[data-testid='qsp-price']"
        );
        assert!(err.is_timeout());
    }
}
