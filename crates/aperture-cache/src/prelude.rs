pub use crate::errors::CacheError;
pub use crate::key::CacheKey;
pub use crate::stats::{CacheStats, SimpleStats};
pub use crate::store::{CacheConfig, TtlCache};
