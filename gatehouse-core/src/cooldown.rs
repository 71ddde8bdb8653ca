//! Per-actor, per-command cooldown tracking for staff commands.
//!
//! Each command has a fixed cooldown window; re-invocation inside the
//! window is rejected with the remaining wait time so the caller can
//! answer "wait N seconds".

use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CooldownCheck {
    Ready,
    /// Still cooling down; retry after this many whole seconds.
    Wait(u64),
}

#[derive(Debug, Default)]
pub struct CooldownTracker {
    last_use: HashMap<(String, String), Instant>,
}

impl CooldownTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check the window for `(command, actor)` and, when ready, record
    /// the use.
    pub fn check(&mut self, command: &str, actor: &str, window: Duration) -> CooldownCheck {
        self.check_at(command, actor, window, Instant::now())
    }

    fn check_at(
        &mut self,
        command: &str,
        actor: &str,
        window: Duration,
        now: Instant,
    ) -> CooldownCheck {
        let key = (command.to_string(), actor.to_string());
        if let Some(last) = self.last_use.get(&key) {
            let elapsed = now.saturating_duration_since(*last);
            if elapsed < window {
                let remaining = window - elapsed;
                return CooldownCheck::Wait(remaining.as_secs_f64().ceil() as u64);
            }
        }
        self.last_use.insert(key, now);
        CooldownCheck::Ready
    }
}
