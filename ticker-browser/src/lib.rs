//! ticker-browser - Rotating headless browser pool for the ticker scraper.
//!
//! - [`browser`]: session traits and the chromiumoxide backend
//! - [`pool`]: borrow/release/rotate over one active and one draining session
//! - [`monitor`]: memory and health loops that trigger rotation
//! - [`stealth`]: user agent rotation, fingerprint spoofing, mouse movement

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod browser;
pub mod error;
pub mod monitor;
pub mod pool;
pub mod stealth;

pub use browser::{BrowserSession, ChromiumLauncher, PageHandle, SessionLauncher};
pub use error::BrowserError;
pub use monitor::{start_monitors, MemorySampler, SessionHealth, SystemMemory};
pub use pool::{BrowserPool, PoolStats, SessionId, SessionLease};
