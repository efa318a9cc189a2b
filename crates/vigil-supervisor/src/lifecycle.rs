//! Restart decisions for one supervised instance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};
use vigil_descriptor::ProcessDescriptor;

const MAX_BACKOFF_DELAY: Duration = Duration::from_secs(15);
const BACKOFF_MULTIPLIER: f64 = 1.5;

/// The restart-related subset of a descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartPolicy {
    pub autorestart: bool,
    pub min_uptime: Duration,
    pub max_restarts: u32,
    pub restart_delay: Duration,
    pub exp_backoff_restart_delay: Option<Duration>,
}

impl From<&ProcessDescriptor> for RestartPolicy {
    fn from(descriptor: &ProcessDescriptor) -> Self {
        Self {
            autorestart: descriptor.autorestart,
            min_uptime: descriptor.min_uptime,
            max_restarts: descriptor.max_restarts,
            restart_delay: descriptor.restart_delay,
            exp_backoff_restart_delay: descriptor.exp_backoff_restart_delay,
        }
    }
}

/// Why a running instance stopped running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The process exited on its own.
    Exited { code: Option<i32> },
    /// Resident memory went over `max_memory_restart`.
    MemoryCeiling,
    /// A watched file changed.
    WatchTriggered,
    /// An operator asked for a restart.
    RestartRequested,
    /// An operator asked for a stop, or the supervisor is shutting down.
    StopRequested,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    Restart { delay: Duration },
    Stop,
    GiveUp,
}

/// Restart statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartStats {
    pub restarts: u32,
    pub unstable_restarts: u32,
    pub last_restart_time: Option<DateTime<Utc>>,
}

/// Counts restarts and applies the rapid-failure rules.
#[derive(Debug, Clone)]
pub struct RestartTracker {
    process_id: String,
    policy: RestartPolicy,
    restarts: u32,
    unstable_restarts: u32,
    last_restart_time: Option<DateTime<Utc>>,
}

impl RestartTracker {
    pub fn new(process_id: impl Into<String>, policy: RestartPolicy) -> Self {
        Self {
            process_id: process_id.into(),
            policy,
            restarts: 0,
            unstable_restarts: 0,
            last_restart_time: None,
        }
    }

    /// Continue the total restart count of an earlier supervision run.
    pub fn with_restarts(mut self, restarts: u32) -> Self {
        self.restarts = restarts;
        self
    }

    pub fn policy(&self) -> &RestartPolicy {
        &self.policy
    }

    /// Decide what happens after the instance stopped running for `reason`
    /// having been up for `uptime`.
    pub fn on_exit(&mut self, reason: ExitReason, uptime: Duration) -> RestartDecision {
        match reason {
            ExitReason::StopRequested => RestartDecision::Stop,
            ExitReason::RestartRequested | ExitReason::WatchTriggered => {
                self.unstable_restarts = 0;
                self.record_restart();
                RestartDecision::Restart {
                    delay: Duration::ZERO,
                }
            }
            ExitReason::MemoryCeiling => {
                if uptime >= self.policy.min_uptime {
                    self.unstable_restarts = 0;
                }
                self.record_restart();
                RestartDecision::Restart {
                    delay: self.policy.restart_delay,
                }
            }
            ExitReason::Exited { code } => {
                if !self.policy.autorestart {
                    info!(
                        "Process {} exited (code {:?}), autorestart disabled",
                        self.process_id, code
                    );
                    return RestartDecision::Stop;
                }

                if uptime >= self.policy.min_uptime {
                    if self.unstable_restarts > 0 {
                        debug!("Process {} was stable, resetting rapid restart counter", self.process_id);
                    }
                    self.unstable_restarts = 0;
                } else {
                    if self.unstable_restarts >= self.policy.max_restarts {
                        warn!(
                            "Process {} exited after {:?} and has restarted rapidly {} times, giving up",
                            self.process_id, uptime, self.unstable_restarts
                        );
                        return RestartDecision::GiveUp;
                    }
                    self.unstable_restarts += 1;
                }

                self.record_restart();
                RestartDecision::Restart {
                    delay: self.restart_delay(),
                }
            }
        }
    }

    /// Clear the rapid-failure history after an operator intervention.
    pub fn reset(&mut self) {
        self.unstable_restarts = 0;
    }

    pub fn stats(&self) -> RestartStats {
        RestartStats {
            restarts: self.restarts,
            unstable_restarts: self.unstable_restarts,
            last_restart_time: self.last_restart_time,
        }
    }

    fn record_restart(&mut self) {
        self.restarts += 1;
        self.last_restart_time = Some(Utc::now());
    }

    fn restart_delay(&self) -> Duration {
        match self.policy.exp_backoff_restart_delay {
            Some(base) => {
                let exponent = self.unstable_restarts.saturating_sub(1).min(64) as i32;
                let nanos = base.as_nanos() as f64 * BACKOFF_MULTIPLIER.powi(exponent);
                if nanos >= MAX_BACKOFF_DELAY.as_nanos() as f64 {
                    MAX_BACKOFF_DELAY
                } else {
                    Duration::from_nanos(nanos.round() as u64)
                }
            }
            None => self.policy.restart_delay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_policy() -> RestartPolicy {
        RestartPolicy {
            autorestart: true,
            min_uptime: Duration::from_secs(10),
            max_restarts: 3,
            restart_delay: Duration::from_millis(250),
            exp_backoff_restart_delay: None,
        }
    }

    fn crash() -> ExitReason {
        ExitReason::Exited { code: Some(1) }
    }

    const RAPID: Duration = Duration::from_secs(1);
    const STABLE: Duration = Duration::from_secs(60);

    #[test]
    fn test_rapid_exits_until_give_up() {
        let mut tracker = RestartTracker::new("voice-resolver-0", create_test_policy());

        for i in 1..=3 {
            assert_eq!(
                tracker.on_exit(crash(), RAPID),
                RestartDecision::Restart {
                    delay: Duration::from_millis(250)
                }
            );
            assert_eq!(tracker.stats().unstable_restarts, i);
        }

        // 4th rapid exit exceeds max_restarts
        assert_eq!(tracker.on_exit(crash(), RAPID), RestartDecision::GiveUp);
        assert_eq!(tracker.stats().restarts, 3);
    }

    #[test]
    fn test_stable_exit_resets_counter() {
        let mut tracker = RestartTracker::new("voice-resolver-0", create_test_policy());

        tracker.on_exit(crash(), RAPID);
        tracker.on_exit(crash(), RAPID);
        assert_eq!(tracker.stats().unstable_restarts, 2);

        assert!(matches!(
            tracker.on_exit(crash(), STABLE),
            RestartDecision::Restart { .. }
        ));
        assert_eq!(tracker.stats().unstable_restarts, 0);
        assert_eq!(tracker.stats().restarts, 3);
    }

    #[test]
    fn test_zero_max_restarts_gives_up_immediately() {
        let mut policy = create_test_policy();
        policy.max_restarts = 0;
        let mut tracker = RestartTracker::new("api-0", policy);

        assert_eq!(tracker.on_exit(crash(), RAPID), RestartDecision::GiveUp);
    }

    #[test]
    fn test_clean_exit_still_restarts() {
        let mut tracker = RestartTracker::new("api-0", create_test_policy());
        assert!(matches!(
            tracker.on_exit(ExitReason::Exited { code: Some(0) }, STABLE),
            RestartDecision::Restart { .. }
        ));
    }

    #[test]
    fn test_autorestart_disabled() {
        let mut policy = create_test_policy();
        policy.autorestart = false;
        let mut tracker = RestartTracker::new("api-0", policy);

        assert_eq!(tracker.on_exit(crash(), STABLE), RestartDecision::Stop);
        assert_eq!(tracker.stats().restarts, 0);
    }

    #[test]
    fn test_stop_requested_never_restarts() {
        let mut tracker = RestartTracker::new("api-0", create_test_policy());
        assert_eq!(
            tracker.on_exit(ExitReason::StopRequested, STABLE),
            RestartDecision::Stop
        );
    }

    #[test]
    fn test_memory_ceiling_is_not_a_rapid_failure() {
        let mut tracker = RestartTracker::new("api-0", create_test_policy());

        for _ in 0..10 {
            assert!(matches!(
                tracker.on_exit(ExitReason::MemoryCeiling, RAPID),
                RestartDecision::Restart { .. }
            ));
        }
        assert_eq!(tracker.stats().unstable_restarts, 0);
        assert_eq!(tracker.stats().restarts, 10);
    }

    #[test]
    fn test_operator_restart_resets_counter() {
        let mut tracker = RestartTracker::new("api-0", create_test_policy());
        tracker.on_exit(crash(), RAPID);
        tracker.on_exit(crash(), RAPID);

        assert_eq!(
            tracker.on_exit(ExitReason::RestartRequested, RAPID),
            RestartDecision::Restart {
                delay: Duration::ZERO
            }
        );
        assert_eq!(tracker.stats().unstable_restarts, 0);

        tracker.on_exit(crash(), RAPID);
        assert!(matches!(
            tracker.on_exit(ExitReason::WatchTriggered, RAPID),
            RestartDecision::Restart { .. }
        ));
        assert_eq!(tracker.stats().unstable_restarts, 0);
    }

    #[test]
    fn test_restart_delay_calculation() {
        let mut policy = create_test_policy();
        policy.max_restarts = 100;
        policy.exp_backoff_restart_delay = Some(Duration::from_millis(100));
        let mut tracker = RestartTracker::new("api-0", policy);

        // First restart: base delay
        assert_eq!(
            tracker.on_exit(crash(), RAPID),
            RestartDecision::Restart {
                delay: Duration::from_millis(100)
            }
        );

        // Second restart: base delay * 1.5
        assert_eq!(
            tracker.on_exit(crash(), RAPID),
            RestartDecision::Restart {
                delay: Duration::from_millis(150)
            }
        );

        // Eventually capped
        for _ in 0..20 {
            tracker.on_exit(crash(), RAPID);
        }
        assert_eq!(
            tracker.on_exit(crash(), RAPID),
            RestartDecision::Restart {
                delay: MAX_BACKOFF_DELAY
            }
        );
    }
}
