//! Crate-wide error taxonomy.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("kernel rejected request: errno {errno}: {message}")]
    Kernel { errno: i32, message: String },

    #[error("kernel rejected {operation}: errno {errno}: {message}")]
    KernelWithContext {
        operation: String,
        errno: i32,
        message: String,
    },

    #[error("truncated message: expected at least {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("invalid attribute: {0}")]
    InvalidAttribute(String),

    #[error("sequence mismatch: expected {expected}, got {actual}")]
    SequenceMismatch { expected: u32, actual: u32 },

    #[error("interface not found: {name}")]
    InterfaceNotFound { name: String },

    #[error("qdisc not found: kind={kind} interface={interface}")]
    QdiscNotFound { kind: String, interface: String },

    #[error("invalid handle: {0}")]
    HandleParse(String),

    #[error("tree error: {0}")]
    Tree(String),
}

impl Error {
    pub fn from_errno(errno: i32) -> Self {
        Self::Kernel {
            errno,
            message: errno_message(errno),
        }
    }

    pub fn from_errno_with_context(operation: impl Into<String>, errno: i32) -> Self {
        Self::KernelWithContext {
            operation: operation.into(),
            errno,
            message: errno_message(errno),
        }
    }

    /// Attach an operation name to an existing kernel error, for extended-ack
    /// propagation up through higher-level call sites.
    pub fn with_context(self, operation: impl Into<String>) -> Self {
        match self {
            Error::Kernel { errno, message } => Error::KernelWithContext {
                operation: operation.into(),
                errno,
                message,
            },
            other => other,
        }
    }

    pub fn errno(&self) -> Option<i32> {
        match self {
            Error::Kernel { errno, .. } => Some(*errno),
            Error::KernelWithContext { errno, .. } => Some(*errno),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.errno() == Some(libc::ENOENT) || self.errno() == Some(-libc::ENOENT)
    }

    pub fn is_permission_denied(&self) -> bool {
        self.errno() == Some(libc::EPERM) || self.errno() == Some(-libc::EPERM)
    }

    pub fn is_already_exists(&self) -> bool {
        self.errno() == Some(libc::EEXIST) || self.errno() == Some(-libc::EEXIST)
    }

    pub fn is_busy(&self) -> bool {
        self.errno() == Some(libc::EBUSY) || self.errno() == Some(-libc::EBUSY)
    }
}

fn errno_message(errno: i32) -> String {
    let abs = errno.unsigned_abs() as i32;
    // SAFETY: strerror returns a pointer to a statically-owned buffer; we copy
    // it out immediately and never retain the pointer.
    unsafe {
        let ptr = libc::strerror(abs);
        if ptr.is_null() {
            format!("errno {abs}")
        } else {
            std::ffi::CStr::from_ptr(ptr).to_string_lossy().into_owned()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_predicate_matches_ebusy() {
        let e = Error::from_errno(-libc::EBUSY);
        assert!(e.is_busy());
        assert!(!e.is_not_found());
    }

    #[test]
    fn with_context_upgrades_kernel_variant() {
        let e = Error::from_errno(-libc::ENOENT).with_context("delete qdisc");
        match e {
            Error::KernelWithContext { operation, .. } => assert_eq!(operation, "delete qdisc"),
            _ => panic!("expected KernelWithContext"),
        }
    }

    #[test]
    fn not_found_predicate() {
        let e = Error::from_errno(-libc::ENOENT);
        assert!(e.is_not_found());
    }
}
