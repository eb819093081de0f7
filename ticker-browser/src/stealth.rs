//! Anti-detection routines.
//!
//! All of these are best-effort: a failed script or mouse move is logged and
//! ignored, never surfaced to the scrape.

use rand::seq::SliceRandom;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::browser::PageHandle;

/// Desktop Chrome user agents rotated per page.
pub const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/118.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/118.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/118.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/117.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/117.0.0.0 Safari/537.36",
];

const WEBGL_SPOOF: &str = r#"(() => {
    const getParameter = WebGLRenderingContext.prototype.getParameter;
    WebGLRenderingContext.prototype.getParameter = function (parameter) {
        if (parameter === 37445) { return "Intel Inc."; }
        if (parameter === 37446) { return "Intel Iris OpenGL Engine"; }
        return getParameter.call(this, parameter);
    };
})();"#;

const CANVAS_SPOOF: &str = r#"(() => {
    const toDataURL = HTMLCanvasElement.prototype.toDataURL;
    HTMLCanvasElement.prototype.toDataURL = function (...args) {
        const ctx = this.getContext("2d");
        if (ctx) {
            ctx.fillStyle = "rgba(0,0,0,0.01)";
            ctx.fillRect(Math.random() * this.width, Math.random() * this.height, 1, 1);
        }
        return toDataURL.apply(this, args);
    };
})();"#;

const DISABLE_WEBRTC: &str = r#"(() => {
    if (navigator.mediaDevices) {
        Object.defineProperty(navigator.mediaDevices, "enumerateDevices", {
            get: () => () => Promise.resolve([]),
        });
    }
})();"#;

/// Viewport area the mouse wanders in.
const MOUSE_AREA: (f64, f64) = (800.0, 600.0);
const MOUSE_MOVES_PER_BURST: usize = 5;

pub fn random_user_agent() -> &'static str {
    USER_AGENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(USER_AGENTS[0])
}

/// Random user agent plus WebGL and Canvas fingerprint spoofing.
///
/// Call on a fresh tab before the first navigation. The spoof scripts are
/// registered for every document the tab loads afterwards.
pub async fn apply_fingerprint_evasion(page: &dyn PageHandle) {
    let user_agent = random_user_agent();
    if let Err(e) = page.set_user_agent(user_agent).await {
        warn!(error = %e, "Failed to set user agent");
    }
    if let Err(e) = page.evaluate_on_new_document(WEBGL_SPOOF).await {
        warn!(error = %e, "Failed to spoof WebGL fingerprint");
    }
    if let Err(e) = page.evaluate_on_new_document(CANVAS_SPOOF).await {
        warn!(error = %e, "Failed to spoof Canvas fingerprint");
    }
}

/// Hide media devices from WebRTC enumeration. Run after every navigation.
pub async fn disable_webrtc(page: &dyn PageHandle) {
    if let Err(e) = page.evaluate(DISABLE_WEBRTC).await {
        debug!(error = %e, "Failed to disable WebRTC");
    }
}

/// One burst of random mouse movement, ending at the viewport centre.
async fn wander(page: &dyn PageHandle, token: &CancellationToken) {
    for _ in 0..MOUSE_MOVES_PER_BURST {
        let (x, y, pause) = {
            let mut rng = rand::thread_rng();
            (
                rng.gen_range(0.0..MOUSE_AREA.0),
                rng.gen_range(0.0..MOUSE_AREA.1),
                rng.gen_range(200..700),
            )
        };
        if let Err(e) = page.move_mouse(x, y).await {
            debug!(error = %e, "Mouse move failed");
            return;
        }

        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(Duration::from_millis(pause)) => {}
        }
    }

    if let Err(e) = page.move_mouse(MOUSE_AREA.0 / 2.0, MOUSE_AREA.1 / 2.0).await {
        debug!(error = %e, "Mouse move failed");
    }
}

/// Move the mouse like a person would until `token` is cancelled.
///
/// Cancel the token before closing the page.
pub fn spawn_human_behavior(page: Arc<dyn PageHandle>, token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!("Starting random behavior");
        loop {
            if token.is_cancelled() {
                break;
            }
            wander(page.as_ref(), &token).await;

            let pause = Duration::from_secs(rand::thread_rng().gen_range(3..8));
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }
        debug!("Stopped random behavior");
    })
}
