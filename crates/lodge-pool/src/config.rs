//! Pool configuration.

use crate::PoolError;

/// Default ceiling on leased handles.
pub const DEFAULT_MAX_ACTIVE: usize = 32;

/// Default ceiling on idle handles.
pub const DEFAULT_MAX_IDLE: usize = 8;

/// Default ceiling on concurrent opens.
pub const DEFAULT_MAX_CONCURRENT_OPENS: usize = 4;

/// What `acquire` does when every handle is leased.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExhaustionPolicy {
    /// Fail immediately with `PoolError::Exhausted`
    #[default]
    Fail,
    /// Wait until a handle is released
    Wait,
}

/// Pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of leased handles
    pub max_active: usize,
    /// Maximum number of idle handles kept for reuse
    pub max_idle: usize,
    /// Maximum number of connections being opened at once
    pub max_concurrent_opens: usize,
    /// Behaviour when `max_active` handles are leased
    pub exhaustion: ExhaustionPolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_active: DEFAULT_MAX_ACTIVE,
            max_idle: DEFAULT_MAX_IDLE,
            max_concurrent_opens: DEFAULT_MAX_CONCURRENT_OPENS,
            exhaustion: ExhaustionPolicy::Fail,
        }
    }
}

impl PoolConfig {
    /// Checks that the ceilings allow at least one connection.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.max_active == 0 {
            return Err(PoolError::Config("max_active must be at least 1".into()));
        }
        if self.max_concurrent_opens == 0 {
            return Err(PoolError::Config(
                "max_concurrent_opens must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
