use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use tracing::{error, info, warn};

#[derive(Copy, Clone, Debug, Display, PartialEq, Eq, Hash, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// A user-facing, non-fatal report of something the layer caught.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub message: String,
    pub description: Option<String>,
    pub severity: Severity,
}

impl Notification {
    pub fn new(message: impl Into<String>, severity: Severity) -> Self {
        Self { message: message.into(), description: None, severity }
    }

    pub fn error(message: impl Into<String>, description: impl Into<String>) -> Self {
        Self { message: message.into(), description: Some(description.into()), severity: Severity::Error }
    }

    pub fn warning(message: impl Into<String>, description: impl Into<String>) -> Self {
        Self { message: message.into(), description: Some(description.into()), severity: Severity::Warning }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// One-way sink for caught failures. Implementations must not block or panic.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Default notifier that forwards every notification to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notification: Notification) {
        let description = notification.description.as_deref().unwrap_or("");
        match notification.severity {
            Severity::Info => info!(target: "notify", "{} {}", notification.message, description),
            Severity::Warning => warn!(target: "notify", "{} {}", notification.message, description),
            Severity::Error => error!(target: "notify", "{} {}", notification.message, description),
        }
    }
}
