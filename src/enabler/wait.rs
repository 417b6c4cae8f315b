use std::time::{Duration, Instant};

use crate::config::EnablerConfig;

/// Outcome of checking the wait budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    Waiting,
    Expired,
}

/// Extended allowance granted to the last plugin still enabling in dev mode
#[derive(Debug, Clone)]
struct Straggler {
    key: String,
    deadline: Instant,
    warn_at: Instant,
    warned: bool,
}

/// Time budget of one enable batch.
///
/// The batch shares a single global deadline. In dev mode, once exactly one
/// plugin remains, that plugin gets its own deadline measured from the moment
/// it became the last one; the later of the two deadlines applies. A warning
/// is logged halfway through the extension.
#[derive(Debug, Clone)]
pub struct WaitBudget {
    deadline: Instant,
    dev_mode: bool,
    straggler_timeout: Duration,
    straggler: Option<Straggler>,
}

impl WaitBudget {
    pub fn new(config: &EnablerConfig, started: Instant) -> Self {
        Self {
            deadline: started + config.timeout,
            dev_mode: config.dev_mode,
            straggler_timeout: config.straggler_timeout,
            straggler: None,
        }
    }

    /// Check the budget against the plugins still pending at `now`
    pub fn check(&mut self, pending: &[&str], now: Instant) -> WaitStatus {
        self.track_straggler(pending, now);

        let deadline = self.effective_deadline();
        if now >= deadline {
            return WaitStatus::Expired;
        }

        if let Some(straggler) = self.straggler.as_mut() {
            if !straggler.warned && now >= straggler.warn_at {
                straggler.warned = true;
                tracing::warn!(
                    "Still waiting for plugin {} to enable; giving up in {:?}",
                    straggler.key,
                    deadline.saturating_duration_since(now)
                );
            }
        }

        WaitStatus::Waiting
    }

    fn track_straggler(&mut self, pending: &[&str], now: Instant) {
        match pending {
            [key] if self.dev_mode => {
                if self.straggler.as_ref().map(|s| s.key.as_str()) != Some(*key) {
                    tracing::info!(
                        "Only plugin {} is still enabling, extending wait by {:?}",
                        key,
                        self.straggler_timeout
                    );
                    self.straggler = Some(Straggler {
                        key: key.to_string(),
                        deadline: now + self.straggler_timeout,
                        warn_at: now + self.straggler_timeout / 2,
                        warned: false,
                    });
                }
            }
            _ => self.straggler = None,
        }
    }

    /// Deadline currently in force
    pub fn effective_deadline(&self) -> Instant {
        match &self.straggler {
            Some(straggler) => self.deadline.max(straggler.deadline),
            None => self.deadline,
        }
    }

    /// Key of the plugin holding an extended allowance
    pub fn straggler(&self) -> Option<&str> {
        self.straggler.as_ref().map(|s| s.key.as_str())
    }

    pub fn straggler_warned(&self) -> bool {
        self.straggler.as_ref().is_some_and(|s| s.warned)
    }
}
