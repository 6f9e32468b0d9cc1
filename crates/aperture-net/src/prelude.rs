pub use crate::client::{HttpServiceClient, ServiceClient};
pub use crate::errors::NetError;
pub use crate::registry::ServiceRegistry;
