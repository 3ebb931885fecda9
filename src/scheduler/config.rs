use std::time::Duration;

/// Tunable knobs for the scheduler control loop.
///
/// Values resolve from the environment (via `dotenvy`) with built-in
/// defaults; explicit builder calls win over both.
#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    /// Interval between ticks of the control loop.
    pub tick: Duration,
    /// How long a canceled job may keep running before it is
    /// force-failed.
    pub cancel_grace: Duration,
    /// How long a job may sit in `waiting` without an engine
    /// acknowledgment before the reaper marks it `error`.
    pub waiting_grace: Duration,
}

impl SchedulerConfig {
    pub const DEFAULT_TICK_MS: u64 = 500;
    pub const DEFAULT_CANCEL_GRACE_SECS: u64 = 30;
    pub const DEFAULT_WAITING_GRACE_SECS: u64 = 60;

    /// Resolve configuration from the environment.
    ///
    /// Reads `TASKWEAVE_TICK_MS`, `TASKWEAVE_CANCEL_GRACE_SECS`, and
    /// `TASKWEAVE_WAITING_GRACE_SECS`; unset or unparsable values fall
    /// back to the defaults.
    #[must_use]
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self {
            tick: Duration::from_millis(env_u64("TASKWEAVE_TICK_MS", Self::DEFAULT_TICK_MS)),
            cancel_grace: Duration::from_secs(env_u64(
                "TASKWEAVE_CANCEL_GRACE_SECS",
                Self::DEFAULT_CANCEL_GRACE_SECS,
            )),
            waiting_grace: Duration::from_secs(env_u64(
                "TASKWEAVE_WAITING_GRACE_SECS",
                Self::DEFAULT_WAITING_GRACE_SECS,
            )),
        }
    }

    #[must_use]
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    #[must_use]
    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = grace;
        self
    }

    #[must_use]
    pub fn with_waiting_grace(mut self, grace: Duration) -> Self {
        self.waiting_grace = grace;
        self
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(Self::DEFAULT_TICK_MS),
            cancel_grace: Duration::from_secs(Self::DEFAULT_CANCEL_GRACE_SECS),
            waiting_grace: Duration::from_secs(Self::DEFAULT_WAITING_GRACE_SECS),
        }
    }
}

fn env_u64(var: &str, default: u64) -> u64 {
    std::env::var(var)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_constants() {
        let config = SchedulerConfig::default();
        assert_eq!(config.tick, Duration::from_millis(500));
        assert_eq!(config.cancel_grace, Duration::from_secs(30));
        assert_eq!(config.waiting_grace, Duration::from_secs(60));
    }

    #[test]
    fn builder_overrides_apply() {
        let config = SchedulerConfig::default()
            .with_tick(Duration::from_millis(50))
            .with_cancel_grace(Duration::from_secs(1))
            .with_waiting_grace(Duration::from_secs(2));
        assert_eq!(config.tick, Duration::from_millis(50));
        assert_eq!(config.cancel_grace, Duration::from_secs(1));
        assert_eq!(config.waiting_grace, Duration::from_secs(2));
    }

    #[test]
    fn unparsable_env_falls_back() {
        assert_eq!(env_u64("TASKWEAVE_TEST_UNSET_VAR", 7), 7);
    }
}
