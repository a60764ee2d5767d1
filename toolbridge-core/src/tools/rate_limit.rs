//! Per-tool sliding-window rate limiting

use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::policy::RateLimitSpec;

/// Sliding-window limiter keyed by tool name.
///
/// A call is admitted when fewer than `max_calls` admitted calls for the same
/// tool fall inside the trailing `window`. Rejected calls do not consume a slot.
#[derive(Debug)]
pub struct RateLimiter {
    spec: RateLimitSpec,
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    /// Create a limiter from a spec
    pub fn new(spec: RateLimitSpec) -> Self {
        Self {
            spec,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// The configured limit
    pub fn spec(&self) -> RateLimitSpec {
        self.spec
    }

    /// Try to take a slot for `tool`.
    ///
    /// Returns the time until the oldest call in the window expires when the
    /// window is full.
    pub async fn try_acquire(&self, tool: &str) -> Result<(), Duration> {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        let calls = windows.entry(tool.to_string()).or_default();

        while let Some(oldest) = calls.front() {
            if now.duration_since(*oldest) >= self.spec.window {
                calls.pop_front();
            } else {
                break;
            }
        }

        if calls.len() >= self.spec.max_calls as usize {
            let retry_after = calls
                .front()
                .map(|oldest| self.spec.window.saturating_sub(now.duration_since(*oldest)))
                .unwrap_or(self.spec.window);
            return Err(retry_after);
        }

        calls.push_back(now);
        Ok(())
    }

    /// Calls currently counted against `tool`'s window
    pub async fn in_window(&self, tool: &str) -> usize {
        let now = Instant::now();
        let windows = self.windows.lock().await;
        windows
            .get(tool)
            .map(|calls| {
                calls
                    .iter()
                    .filter(|at| now.duration_since(**at) < self.spec.window)
                    .count()
            })
            .unwrap_or(0)
    }
}
