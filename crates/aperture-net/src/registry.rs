use std::collections::HashMap;

use url::Url;

use crate::errors::NetError;

/// Service-name to base-URL mapping, configured at bootstrap.
#[derive(Clone, Debug, Default)]
pub struct ServiceRegistry {
    endpoints: HashMap<String, Url>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(endpoints: &HashMap<String, String>) -> Result<Self, NetError> {
        let mut registry = Self::new();
        for (service, raw) in endpoints {
            let url = Url::parse(raw)
                .map_err(|err| NetError::invalid_endpoint(service, &err.to_string()))?;
            registry.endpoints.insert(service.clone(), url);
        }
        Ok(registry)
    }

    pub fn insert(&mut self, service: impl Into<String>, url: Url) {
        self.endpoints.insert(service.into(), url);
    }

    pub fn endpoint(&self, service: &str) -> Result<&Url, NetError> {
        self.endpoints
            .get(service)
            .ok_or_else(|| NetError::unknown_service(service))
    }

    pub fn services(&self) -> impl Iterator<Item = &str> {
        self.endpoints.keys().map(|s| s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_configured_endpoints() {
        let mut map = HashMap::new();
        map.insert("UserService".to_string(), "http://localhost:7001".to_string());
        let registry = ServiceRegistry::from_map(&map).expect("registry");
        assert_eq!(
            registry.endpoint("UserService").expect("endpoint").as_str(),
            "http://localhost:7001/"
        );
    }

    #[test]
    fn unknown_service_is_an_error() {
        let registry = ServiceRegistry::new();
        assert!(registry.endpoint("missing").is_err());
    }

    #[test]
    fn rejects_malformed_urls() {
        let mut map = HashMap::new();
        map.insert("Bad".to_string(), "not a url".to_string());
        assert!(ServiceRegistry::from_map(&map).is_err());
    }
}
