// Copyright 2026 RedCell (https://github.com/redcell)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Module error types

use thiserror::Error;

/// Result type for module operations
pub type ModuleResult<T> = Result<T, ModuleError>;

/// Reason attached to an `OperationFailure` raised via `fail_with`.
///
/// The invocation harness uses this to decide how to report a terminated
/// module run; none of these are retried internally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureReason {
    /// No failure reason was given
    None,
    /// Failure cause could not be determined
    Unknown,
    /// Target could not be reached at all
    Unreachable,
    /// Supplied configuration was invalid
    BadConfig,
    /// Connection was established but then lost
    Disconnected,
    /// Target was reached but the expected service was absent
    NotFound,
    /// Target replied in an unexpected way
    UnexpectedReply,
    /// Operation ran out of time
    TimeoutExpired,
    /// User asked for the run to stop
    UserInterrupt,
    /// Credentials or privileges were insufficient
    NoAccess,
    /// No target was selected or applicable
    NoTarget,
    /// Target was determined not to be vulnerable
    NotVulnerable,
    /// Delivered payload never produced a session
    PayloadFailed,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureReason::None => "none",
            FailureReason::Unknown => "unknown",
            FailureReason::Unreachable => "unreachable",
            FailureReason::BadConfig => "bad-config",
            FailureReason::Disconnected => "disconnected",
            FailureReason::NotFound => "not-found",
            FailureReason::UnexpectedReply => "unexpected-reply",
            FailureReason::TimeoutExpired => "timeout-expired",
            FailureReason::UserInterrupt => "user-interrupt",
            FailureReason::NoAccess => "no-access",
            FailureReason::NoTarget => "no-target",
            FailureReason::NotVulnerable => "not-vulnerable",
            FailureReason::PayloadFailed => "payload-failed",
        };
        write!(f, "{}", s)
    }
}

/// Errors that can occur in the module substrate
#[derive(Debug, Error)]
pub enum ModuleError {
    // Metadata errors
    #[error("Malformed metadata field '{field}': {reason}")]
    MalformedField {
        field: &'static str,
        reason: String,
    },

    // Datastore errors
    #[error("Datastore key '{0}' is read-only")]
    ConfigImmutable(String),

    // Extension errors
    #[error("Invalid extension configuration: expected a list of extension ids, found {0}")]
    InvalidExtensionConfiguration(String),

    #[error("Unknown extension: {0}")]
    UnknownExtension(String),

    // Runtime errors
    #[error("Module operation failed ({reason}): {message}")]
    OperationFailure {
        reason: FailureReason,
        message: String,
    },

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl ModuleError {
    /// Shorthand for a `MalformedField` error.
    pub fn malformed(field: &'static str, reason: impl Into<String>) -> Self {
        ModuleError::MalformedField {
            field,
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for ModuleError {
    fn from(e: serde_json::Error) -> Self {
        ModuleError::SerializationError(e.to_string())
    }
}
