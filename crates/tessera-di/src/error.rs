//! Error types for registration and resolution

use thiserror::Error;

/// Errors that can occur during dependency injection operations
#[derive(Debug, Error)]
pub enum DIError {
    #[error("Service not registered: {service_type}")]
    ServiceNotRegistered { service_type: String },

    #[error("Service already registered: {service_type}")]
    ServiceAlreadyRegistered { service_type: String },

    #[error("Invalid service type: {message}")]
    InvalidServiceType { message: String },

    #[error("Dependency resolution failed: {message}")]
    DependencyResolutionFailed { message: String },

    #[error("Invalid decorator {decorator_type}: {message}")]
    InvalidDecorator {
        decorator_type: String,
        message: String,
    },

    #[error("Failed to build decorator {decorator_type}: {source}")]
    DecoratorConstructionFailed {
        decorator_type: String,
        #[source]
        source: Box<DIError>,
    },

    #[error("Type {type_name} violates a generic constraint: {message}")]
    ConstraintViolation { type_name: String, message: String },

    #[error("Service {service_type} is scoped and was requested outside of a scope")]
    ScopeRequired { service_type: String },

    #[error("Unknown type: {message}")]
    UnknownType { message: String },

    #[error("The container can't be changed after the first call to get_instance; {message}")]
    ContainerLocked { message: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Verification failed with {} error(s): {}", failures.len(), failures.join("; "))]
    Verification { failures: Vec<String> },
}

pub type DIResult<T> = Result<T, DIError>;

impl From<config::ConfigError> for DIError {
    fn from(err: config::ConfigError) -> Self {
        DIError::Configuration(err.to_string())
    }
}

impl From<toml::de::Error> for DIError {
    fn from(err: toml::de::Error) -> Self {
        DIError::Configuration(err.to_string())
    }
}

impl From<serde_json::Error> for DIError {
    fn from(err: serde_json::Error) -> Self {
        DIError::Configuration(err.to_string())
    }
}
