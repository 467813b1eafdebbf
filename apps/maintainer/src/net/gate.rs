//! Shared cooldown gate for every call to the content backend.
//!
//! Calls are spaced `cooldown` apart. Each call reports its latency back;
//! slow calls add `step` to the cooldown (capped at `max`), fast calls take
//! `step` back off until it returns to `base`.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct GatePolicy {
    pub base: Duration,
    pub step: Duration,
    pub max: Duration,
    pub slow_threshold: Duration,
}

impl Default for GatePolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            step: Duration::from_secs(1),
            max: Duration::from_secs(30),
            slow_threshold: Duration::from_secs(5),
        }
    }
}

struct GateState {
    cooldown: Duration,
    next_slot: Option<Instant>,
}

pub struct CooldownGate {
    policy: GatePolicy,
    state: Mutex<GateState>,
}

impl CooldownGate {
    pub fn new(policy: GatePolicy) -> Self {
        let cooldown = policy.base;
        Self {
            policy,
            state: Mutex::new(GateState {
                cooldown,
                next_slot: None,
            }),
        }
    }

    /// Waits for this caller's slot. Slots are handed out in call order.
    pub async fn wait(&self) {
        let slot = {
            let mut state = self.state.lock().await;
            let now = Instant::now();
            let slot = match state.next_slot {
                Some(next) if next > now => next,
                _ => now,
            };
            state.next_slot = Some(slot + state.cooldown);
            slot
        };
        tokio::time::sleep_until(slot).await;
    }

    /// Feeds an observed latency back into the cooldown.
    pub async fn report(&self, latency: Duration) {
        let mut state = self.state.lock().await;
        let before = state.cooldown;
        if latency >= self.policy.slow_threshold {
            state.cooldown = (state.cooldown + self.policy.step).min(self.policy.max);
            if state.cooldown != before {
                warn!(
                    latency_ms = latency.as_millis() as u64,
                    cooldown_ms = state.cooldown.as_millis() as u64,
                    "Backend slow, widening cooldown"
                );
            }
        } else {
            state.cooldown = state
                .cooldown
                .saturating_sub(self.policy.step)
                .max(self.policy.base);
            if state.cooldown != before {
                debug!(cooldown_ms = state.cooldown.as_millis() as u64, "Cooldown eased");
            }
        }
    }

    #[cfg(test)]
    pub(crate) async fn current_cooldown(&self) -> Duration {
        self.state.lock().await.cooldown
    }
}
