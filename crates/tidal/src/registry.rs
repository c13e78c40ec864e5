//! Endpoint registry: URI path -> application endpoint.
//!
//! A path maps to at most one endpoint at any time; registering a second
//! endpoint under a bound path fails and leaves the original binding
//! untouched. Shared between the accept loop and application threads, so
//! the map lives behind a mutex.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::endpoint::Endpoint;
use crate::error::RegistryError;

/// Syntax rule for endpoint paths: non-empty, absolute, free of whitespace,
/// control characters and fragments, with no empty or dot segments.
pub fn validate_path(path: &str) -> Result<(), RegistryError> {
    let invalid = |reason| {
        Err(RegistryError::InvalidPath {
            path: path.to_string(),
            reason,
        })
    };

    if path.is_empty() {
        return invalid("path is empty");
    }
    if !path.starts_with('/') {
        return invalid("path must begin with '/'");
    }
    if path
        .chars()
        .any(|c| c.is_ascii_whitespace() || c.is_ascii_control())
    {
        return invalid("path must not contain whitespace or control characters");
    }
    if path.contains(['#', '?']) {
        return invalid("path must not contain a query or fragment");
    }
    if path != "/" {
        for segment in path[1..].split('/') {
            match segment {
                "" => return invalid("path must not contain empty segments"),
                "." | ".." => return invalid("path must not contain dot segments"),
                _ => {}
            }
        }
    }
    Ok(())
}

/// Path-keyed endpoint map.
#[derive(Default)]
pub struct EndpointRegistry {
    endpoints: Mutex<HashMap<String, Arc<dyn Endpoint>>>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `endpoint` to `path`. Fails on invalid path syntax or if the
    /// path is already bound; the existing binding is never replaced.
    pub fn register(&self, path: &str, endpoint: Arc<dyn Endpoint>) -> Result<(), RegistryError> {
        validate_path(path)?;
        let mut endpoints = self.endpoints.lock();
        if endpoints.contains_key(path) {
            return Err(RegistryError::DuplicateEndpoint(path.to_string()));
        }
        endpoints.insert(path.to_string(), endpoint);
        Ok(())
    }

    /// Remove the binding for `path`, returning it if one existed.
    pub fn unregister(&self, path: &str) -> Option<Arc<dyn Endpoint>> {
        self.endpoints.lock().remove(path)
    }

    /// Look up the endpoint bound to `path` (exact match, no query string).
    pub fn lookup(&self, path: &str) -> Option<Arc<dyn Endpoint>> {
        self.endpoints.lock().get(path).cloned()
    }

    pub fn len(&self) -> usize {
        self.endpoints.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.lock().is_empty()
    }
}
