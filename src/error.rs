//! Errors raised while declaring, checking and provisioning site stacks.

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid domain '{domain}': {reason}")]
    InvalidDomain { domain: String, reason: String },

    /// duplicate, dangling or cyclic references between resources
    #[error("Invalid stack graph: {0}")]
    Graph(String),

    /// a synthesized stack violates one of its static consistency checks
    #[error("Stack '{stack}' failed check: {reason}")]
    Inconsistent { stack: String, reason: String },

    #[error("No hosted zone found for '{0}'")]
    ZoneNotFound(String),

    #[error("Certificate validation for '{0}' timed out")]
    CertificateValidationTimeout(String),

    #[error("Certificate validation for '{domain}' failed: {reason}")]
    CertificateValidationFailed { domain: String, reason: String },

    #[error("Resource '{logical_id}' conflicts with an existing resource: {reason}")]
    ResourceConflict { logical_id: String, reason: String },

    #[error("Policy denied creating '{logical_id}' ({resource_type})")]
    PolicyDenied { logical_id: String, resource_type: String },

    #[error("Alias target '{0}' could not be resolved")]
    AliasTargetUnresolved(String),

    #[error("Provisioning backend error: {0}")]
    Backend(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config(message.into())
    }

    pub fn graph<S: Into<String>>(message: S) -> Self {
        Self::Graph(message.into())
    }

    pub fn backend<S: Into<String>>(message: S) -> Self {
        Self::Backend(message.into())
    }

    pub fn inconsistent<S: Into<String>, R: Into<String>>(stack: S, reason: R) -> Self {
        Self::Inconsistent { stack: stack.into(), reason: reason.into() }
    }

    pub fn invalid_domain<S: Into<String>, R: Into<String>>(domain: S, reason: R) -> Self {
        Self::InvalidDomain { domain: domain.into(), reason: reason.into() }
    }
}
