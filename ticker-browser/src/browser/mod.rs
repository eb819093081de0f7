//! Browser control module.
//!
//! The pool and the scraper only talk to the traits in [`session`]; the
//! chromiumoxide implementation lives in [`chromium`].

pub mod chromium;
pub mod session;
pub mod wait;

pub use chromium::{ChromiumLauncher, ChromiumPage, ChromiumSession};
pub use session::{BrowserSession, PageHandle, SessionLauncher};
pub use wait::{goto_within, wait_for_text, wait_for_texts, POLL_INTERVAL};
