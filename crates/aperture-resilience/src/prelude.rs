pub use crate::breaker::{BreakerConfig, BreakerSnapshot, BreakerTable, CircuitState};
pub use crate::config::{BreakerSettings, ResilienceConfig, ServiceRetryOverride};
pub use crate::retry::RetryPolicy;
