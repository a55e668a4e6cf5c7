//! Error types shared by all kiln crates

use miette::Diagnostic;
use std::path::Path;
use thiserror::Error;

/// Error type for cache operations
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// I/O error during cache operations
    #[error("I/O {operation} failed{}", path.as_ref().map_or(String::new(), |p| format!(": {}", p.display())))]
    #[diagnostic(
        code(kiln::io),
        help("Check file permissions and ensure the path exists")
    )]
    Io {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
        /// Path that caused the error, if available
        path: Option<Box<Path>>,
        /// Operation that failed (e.g., "read", "write", "create")
        operation: String,
    },

    /// Malformed key component or file name. Never sent to a store.
    #[error("Invalid cache identifier: {message}")]
    #[diagnostic(
        code(kiln::validation),
        help("Key components and file names may contain letters, digits, '_', '-' and single dots")
    )]
    Validation {
        /// What was rejected and why
        message: String,
    },

    /// Transient failure of a backing store (disk, network, object storage).
    /// Recoverable: the failure-isolating decorator absorbs these.
    #[error("Cache storage fault: {message}")]
    #[diagnostic(code(kiln::storage_fault))]
    StorageFault {
        /// Description of the fault
        message: String,
    },

    /// Remote server speaks an older protocol than this client supports.
    /// Fatal: must abort the operation rather than degrade to a miss.
    #[error("Cache server protocol version {server} is older than the minimum supported {minimum}")]
    #[diagnostic(
        code(kiln::protocol),
        help("Upgrade the cache server or lower the client's minimum protocol version")
    )]
    ProtocolMismatch {
        /// Version advertised by the server
        server: u32,
        /// Minimum version this client accepts
        minimum: u32,
    },

    /// Archive integrity violation (e.g. an entry escaping the target
    /// directory). Fatal: aborts the whole unpack.
    #[error("Archive error: {message}")]
    #[diagnostic(code(kiln::archive))]
    Archive {
        /// Description of the violation
        message: String,
    },

    /// Serialization error
    #[error("Serialization error: {message}")]
    #[diagnostic(code(kiln::serialization))]
    Serialization {
        /// Error message describing the serialization issue
        message: String,
    },

    /// Configuration error
    #[error("Cache configuration error: {message}")]
    #[diagnostic(code(kiln::config))]
    Configuration {
        /// Error message describing the configuration issue
        message: String,
    },
}

impl Error {
    /// Create an I/O error with path context
    #[must_use]
    pub fn io(
        source: std::io::Error,
        path: impl AsRef<Path>,
        operation: impl Into<String>,
    ) -> Self {
        Self::Io {
            source,
            path: Some(path.as_ref().into()),
            operation: operation.into(),
        }
    }

    /// Create a validation error
    #[must_use]
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a storage fault
    #[must_use]
    pub fn storage_fault(msg: impl Into<String>) -> Self {
        Self::StorageFault {
            message: msg.into(),
        }
    }

    /// Create an archive integrity error
    #[must_use]
    pub fn archive(msg: impl Into<String>) -> Self {
        Self::Archive {
            message: msg.into(),
        }
    }

    /// Create a serialization error
    #[must_use]
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create a configuration error
    #[must_use]
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    /// Whether this error is a recoverable storage fault.
    ///
    /// The failure-isolating decorator absorbs exactly these; validation and
    /// protocol errors pass through untouched.
    #[must_use]
    pub fn is_storage_fault(&self) -> bool {
        matches!(self, Self::StorageFault { .. } | Self::Io { .. })
    }
}

/// Result type for cache operations
pub type Result<T> = std::result::Result<T, Error>;
