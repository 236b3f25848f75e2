//! Diagnostic messages and execution results
//!
//! Domain command processing and constraint validation never fail the caller
//! directly: they report [`DiagnosticMessage`]s collected in an
//! [`ExecutionResult`]. A result containing at least one error diagnostic
//! aborts the session.

use crate::identity::Identity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity of a diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// Informational
    Info,
    /// Reported, but does not abort
    Warning,
    /// Aborts the session
    Error,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageType::Info => write!(f, "info"),
            MessageType::Warning => write!(f, "warning"),
            MessageType::Error => write!(f, "error"),
        }
    }
}

/// One diagnostic produced while executing commands or checking constraints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticMessage {
    /// Severity
    pub message_type: MessageType,
    /// Human-readable text
    pub message: String,
    /// Element the message is about, if any
    pub element: Option<Identity>,
    /// Property the message is about, if any
    pub property: Option<String>,
    /// When the message was created
    pub timestamp: DateTime<Utc>,
}

impl DiagnosticMessage {
    /// Create a message of the given severity
    pub fn new(message_type: MessageType, message: impl Into<String>) -> Self {
        Self {
            message_type,
            message: message.into(),
            element: None,
            property: None,
            timestamp: Utc::now(),
        }
    }

    /// Create an error diagnostic
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(MessageType::Error, message)
    }

    /// Create a warning diagnostic
    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(MessageType::Warning, message)
    }

    /// Create an informational diagnostic
    pub fn info(message: impl Into<String>) -> Self {
        Self::new(MessageType::Info, message)
    }

    /// Attach the element the message refers to
    pub fn with_element(mut self, element: Identity) -> Self {
        self.element = Some(element);
        self
    }

    /// Attach the property the message refers to
    pub fn with_property(mut self, property: impl Into<String>) -> Self {
        self.property = Some(property.into());
        self
    }

    /// Check if this is an error diagnostic
    pub fn is_error(&self) -> bool {
        self.message_type == MessageType::Error
    }
}

impl fmt::Display for DiagnosticMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.message_type, self.message)?;
        if let Some(element) = &self.element {
            write!(f, " ({}", element)?;
            if let Some(property) = &self.property {
                write!(f, ".{}", property)?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

/// Ordered collection of diagnostics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    messages: Vec<DiagnosticMessage>,
}

impl ExecutionResult {
    /// Empty, successful result
    pub fn new() -> Self {
        Self::default()
    }

    /// Result holding the given messages
    pub fn from_messages(messages: Vec<DiagnosticMessage>) -> Self {
        Self { messages }
    }

    /// Append one diagnostic
    pub fn add(&mut self, message: DiagnosticMessage) {
        self.messages.push(message);
    }

    /// Append every diagnostic of another result
    pub fn merge(&mut self, other: ExecutionResult) {
        self.messages.extend(other.messages);
    }

    /// All diagnostics in insertion order
    pub fn messages(&self) -> &[DiagnosticMessage] {
        &self.messages
    }

    /// Consume into the message list
    pub fn into_messages(self) -> Vec<DiagnosticMessage> {
        self.messages
    }

    /// Error diagnostics only
    pub fn errors(&self) -> impl Iterator<Item = &DiagnosticMessage> {
        self.messages.iter().filter(|m| m.is_error())
    }

    /// True when at least one error diagnostic is present
    pub fn has_errors(&self) -> bool {
        self.messages.iter().any(|m| m.is_error())
    }

    /// True when at least one warning diagnostic is present
    pub fn has_warnings(&self) -> bool {
        self.messages
            .iter()
            .any(|m| m.message_type == MessageType::Warning)
    }

    /// True when there are no error diagnostics
    pub fn succeeded(&self) -> bool {
        !self.has_errors()
    }

    /// Number of diagnostics
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// True when there are no diagnostics at all
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl From<Vec<DiagnosticMessage>> for ExecutionResult {
    fn from(messages: Vec<DiagnosticMessage>) -> Self {
        Self::from_messages(messages)
    }
}

impl Extend<DiagnosticMessage> for ExecutionResult {
    fn extend<I: IntoIterator<Item = DiagnosticMessage>>(&mut self, iter: I) {
        self.messages.extend(iter);
    }
}
