//! Mapping inbound requests to throttled identities.

use async_trait::async_trait;

use crate::error::Result;

/// Who is making a request, and which logical request it is.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientIdentity {
    /// Stable key for the client (IP, API key, session...)
    pub identifier: String,
    /// Token for the current logical request; `None` disables de-duplication
    pub request_instance_id: Option<String>,
}

impl ClientIdentity {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            request_instance_id: None,
        }
    }

    /// Attach the request instance token, e.g. a correlation id.
    pub fn with_request_instance(mut self, id: impl Into<String>) -> Self {
        self.request_instance_id = Some(id.into());
        self
    }
}

/// Resolves the client behind a request of type `R`.
#[async_trait]
pub trait ClientRecognizer<R: ?Sized + Sync>: Send + Sync {
    async fn identify(&self, request: &R) -> Result<ClientIdentity>;
}
