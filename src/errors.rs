// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Error types for the DynaKube reconciler.
//!
//! Every failure in a reconciliation pass ends up as an [`Error`]. The root
//! reconciler classifies the aggregate error to decide the phase and the requeue
//! interval:
//!
//! - [`Error::Unreachable`] - Dynatrace API throttled or unavailable, fast requeue, phase untouched
//! - [`Error::ConfigurationInvalid`] / [`Error::Token`] - phase `Error`, propagated
//! - [`Error::Conflict`] / [`Error::Transient`] - logged and swallowed where they occur
//! - everything else - phase `Error`, propagated
//!
//! Errors from independent components are collected and combined with [`join`], so
//! classification helpers such as [`Error::is_unreachable`] look through
//! [`Error::Multiple`] and [`Error::Context`].

use thiserror::Error;

/// Result type used by all reconcilers.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors that can occur while reconciling a `DynaKube`.
#[derive(Error, Debug)]
pub enum Error {
    /// Dynatrace API answered with HTTP 429 or 503.
    ///
    /// The tenant is throttling us or temporarily down. This is not a failure of the
    /// `DynaKube`; the root reconciler requeues quickly without touching the phase.
    #[error("Dynatrace API unreachable (HTTP {status}): {message}")]
    Unreachable {
        /// HTTP status code returned by the tenant
        status: u16,
        /// Response body or transport error text
        message: String,
    },

    /// The `DynaKube` (or the cluster it runs in) is configured in a way we cannot act on.
    #[error("invalid configuration: {0}")]
    ConfigurationInvalid(String),

    /// Tokens are missing, unreadable, or lack required scopes.
    #[error("{0}")]
    Token(String),

    /// A failure expected to go away on the next pass.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Optimistic-concurrency conflict on a Kubernetes write.
    #[error("conflict while writing {kind} {name}")]
    Conflict {
        /// Kind of the object that was written
        kind: String,
        /// Name of the object that was written
        name: String,
    },

    /// Dynatrace API answered with a non-success status other than 429/503.
    #[error("Dynatrace API request failed (HTTP {status}): {message}")]
    DynatraceApi {
        /// HTTP status code returned by the tenant
        status: u16,
        /// Response body
        message: String,
    },

    /// Transport level failure talking to the Dynatrace API.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Kubernetes API failure.
    #[error("Kubernetes API request failed: {0}")]
    Kube(#[from] kube::Error),

    /// An object could not be (de)serialized.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// OneAgent connection info has no communication hosts yet.
    ///
    /// Not a failure: it marks OneAgent as not-yet-ready and asks for a fast requeue.
    #[error("no communication hosts available for OneAgent")]
    NoOneAgentCommunicationHosts,

    /// The ambient cancellation token fired while the pass was running.
    #[error("reconciliation cancelled")]
    Cancelled,

    /// Errors of several independent components.
    #[error("{}", join_messages(.0))]
    Multiple(Vec<Error>),

    /// An error annotated with the step that produced it.
    #[error("{context}: {source}")]
    Context {
        /// Description of the failing step
        context: String,
        /// The underlying error
        #[source]
        source: Box<Error>,
    },
}

fn join_messages(errors: &[Error]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Build an [`Error::Unreachable`].
    pub fn unreachable(status: u16, message: impl Into<String>) -> Self {
        Self::Unreachable {
            status,
            message: message.into(),
        }
    }

    /// Build an [`Error::ConfigurationInvalid`].
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::ConfigurationInvalid(message.into())
    }

    /// Wrap the error with the step that produced it.
    #[must_use]
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// `true` if this error, or any error it wraps, is [`Error::Unreachable`].
    #[must_use]
    pub fn is_unreachable(&self) -> bool {
        self.any(&|e| matches!(e, Self::Unreachable { .. }))
    }

    /// `true` if this error, or any error it wraps, is [`Error::NoOneAgentCommunicationHosts`].
    #[must_use]
    pub fn is_no_communication_hosts(&self) -> bool {
        self.any(&|e| matches!(e, Self::NoOneAgentCommunicationHosts))
    }

    /// `true` if this error, or any error it wraps, is [`Error::Cancelled`].
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.any(&|e| matches!(e, Self::Cancelled))
    }

    /// `true` if this error is a write conflict.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        self.any(&|e| match e {
            Self::Conflict { .. } => true,
            Self::Kube(kube::Error::Api(resp)) => resp.code == 409,
            _ => false,
        })
    }

    fn any(&self, predicate: &dyn Fn(&Error) -> bool) -> bool {
        if predicate(self) {
            return true;
        }
        match self {
            Self::Multiple(errors) => errors.iter().any(|e| e.any(predicate)),
            Self::Context { source, .. } => source.any(predicate),
            _ => false,
        }
    }

    /// Metric label for the error class.
    #[must_use]
    pub fn metric_label(&self) -> &'static str {
        match self {
            Self::Unreachable { .. } => "unreachable",
            Self::ConfigurationInvalid(_) => "configuration",
            Self::Token(_) => "token",
            Self::Transient(_) | Self::Conflict { .. } => "transient",
            Self::Cancelled => "cancelled",
            Self::Context { source, .. } => source.metric_label(),
            _ => "unexpected",
        }
    }
}

/// Combine the errors of independent steps.
///
/// An empty list is success, a single error is returned as is, anything else is
/// wrapped in [`Error::Multiple`].
///
/// # Errors
///
/// Returns the combined error if `errors` is not empty.
pub fn join(mut errors: Vec<Error>) -> Result<()> {
    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.remove(0)),
        _ => Err(Error::Multiple(errors)),
    }
}

/// Attach step context to fallible results.
pub trait ResultExt<T> {
    /// Wrap the error, if any, with `context`.
    ///
    /// # Errors
    ///
    /// Returns the wrapped error.
    fn context(self, context: &str) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: &str) -> Result<T> {
        self.map_err(|e| e.context(context))
    }
}

#[cfg(test)]
#[path = "errors_tests.rs"]
mod errors_tests;
