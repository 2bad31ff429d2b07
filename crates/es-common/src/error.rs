//! Error types for the Elasticsearch operator
//!
//! Errors are structured with fields to aid debugging in production.
//! Platform failures are wrapped in [`Error::Step`] so the message names
//! the sub-step of the reconcile pass that failed.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for operator operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Configuration error in the Elasticsearch spec
    #[error("validation error for {cluster}: {message}")]
    Validation {
        /// Name of the cluster with invalid configuration
        cluster: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.nodes[0].roles")
        field: Option<String>,
    },

    /// A resource the caller expected to exist is absent
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        /// Resource kind (Deployment, StatefulSet, ...)
        kind: String,
        /// Resource name
        name: String,
        /// Resource namespace
        namespace: String,
    },

    /// A create call collided with an existing resource
    #[error("{kind} {namespace}/{name} already exists")]
    AlreadyExists {
        /// Resource kind (Deployment, StatefulSet, ...)
        kind: String,
        /// Resource name
        name: String,
        /// Resource namespace
        namespace: String,
    },

    /// A sub-step of a reconcile pass failed
    #[error("{step}: {source}")]
    Step {
        /// What was being attempted (e.g., "listing replica sets")
        step: String,
        /// The underlying failure
        #[source]
        source: Box<Error>,
    },

}

impl Error {
    /// Create a validation error without cluster context
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            cluster: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with cluster context and field path
    pub fn validation_for_field(
        cluster: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            cluster: cluster.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a not-found error for a named resource
    pub fn not_found(
        kind: impl Into<String>,
        name: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    /// Create an already-exists error for a named resource
    pub fn already_exists(
        kind: impl Into<String>,
        name: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self::AlreadyExists {
            kind: kind.into(),
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    /// Wrap an error with the sub-step that produced it
    pub fn step(step: impl Into<String>, source: Error) -> Self {
        Self::Step {
            step: step.into(),
            source: Box::new(source),
        }
    }

    /// The innermost error, looking through any `Step` wrappers
    pub fn root(&self) -> &Error {
        match self {
            Error::Step { source, .. } => source.root(),
            other => other,
        }
    }

    /// True if the resource the operation targeted does not exist
    pub fn is_not_found(&self) -> bool {
        match self.root() {
            Error::NotFound { .. } => true,
            Error::Kube {
                source: kube::Error::Api(ae),
            } => ae.code == 404,
            _ => false,
        }
    }

    /// True if a create collided with an existing resource
    pub fn is_already_exists(&self) -> bool {
        match self.root() {
            Error::AlreadyExists { .. } => true,
            Error::Kube {
                source: kube::Error::Api(ae),
            } => ae.code == 409,
            _ => false,
        }
    }

    /// Check if this error is retryable
    ///
    /// Validation errors are not retryable (require a spec fix).
    /// Kubernetes errors depend on the status code.
    pub fn is_retryable(&self) -> bool {
        match self.root() {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code) && ae.code != 409
            ),
            Error::Validation { .. } => false,
            Error::NotFound { .. } => true,
            Error::AlreadyExists { .. } => true,
            Error::Step { .. } => true,
        }
    }
}

/// Attach a step description to the error side of a `Result`
pub trait Context<T> {
    /// Wrap any error in [`Error::Step`] naming `step`
    fn context(self, step: impl Into<String>) -> Result<T, Error>;

    /// Like [`Context::context`] but builds the description lazily
    fn with_context<S, F>(self, f: F) -> Result<T, Error>
    where
        S: Into<String>,
        F: FnOnce() -> S;
}

impl<T, E: Into<Error>> Context<T> for Result<T, E> {
    fn context(self, step: impl Into<String>) -> Result<T, Error> {
        self.map_err(|e| Error::step(step, e.into()))
    }

    fn with_context<S, F>(self, f: F) -> Result<T, Error>
    where
        S: Into<String>,
        F: FnOnce() -> S,
    {
        self.map_err(|e| Error::step(f(), e.into()))
    }
}
