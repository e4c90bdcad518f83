use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Extra wait added once the window is full, so the oldest slot has surely expired
const WINDOW_SLACK: Duration = Duration::from_millis(50);

#[derive(Debug, Default)]
struct LimiterState {
    timestamps: VecDeque<Instant>,
    last: Option<Instant>,
}

/// Sliding-window rate limiter: at most `max_requests` per `window`, and no
/// two requests closer together than `min_interval`.
///
/// Clones share the same budget.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    state: Arc<Mutex<LimiterState>>,
    max_requests: usize,
    window: Duration,
    min_interval: Duration,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(LimiterState::default())),
            max_requests: max_requests.max(1),
            window,
            min_interval: Duration::ZERO,
        }
    }

    pub fn per_minute(max_requests: usize) -> Self {
        Self::new(max_requests, Duration::from_secs(60))
    }

    pub fn with_min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = min_interval;
        self
    }

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Waits until a request slot is free and claims it.
    pub async fn acquire(&self) {
        loop {
            let mut state = self.state.lock().await;
            let now = Instant::now();

            // Remove timestamps outside the window
            while let Some(&front) = state.timestamps.front() {
                if now.duration_since(front) >= self.window {
                    state.timestamps.pop_front();
                } else {
                    break;
                }
            }

            let spacing_wait = state
                .last
                .map(|last| (last + self.min_interval).saturating_duration_since(now))
                .unwrap_or(Duration::ZERO);
            let window_wait = if state.timestamps.len() >= self.max_requests {
                state
                    .timestamps
                    .front()
                    .map(|&oldest| (oldest + self.window).saturating_duration_since(now) + WINDOW_SLACK)
                    .unwrap_or(Duration::ZERO)
            } else {
                Duration::ZERO
            };

            let wait = spacing_wait.max(window_wait);
            if wait.is_zero() {
                state.timestamps.push_back(now);
                state.last = Some(now);
                return;
            }

            drop(state);
            if !window_wait.is_zero() {
                tracing::debug!("Rate limiter: waiting {:.1}s for a provider slot", wait.as_secs_f64());
            }
            tokio::time::sleep(wait).await;
        }
    }
}
