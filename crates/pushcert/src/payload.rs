//! Notification payload and its APNs JSON envelope.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::errors::PushError;

/// Delivery priority, sent as the `apns-priority` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Priority {
    /// Deliver opportunistically (1).
    Low = 1,
    /// Deliver with power considerations (5).
    Medium = 5,
    /// Deliver immediately (10).
    Immediate = 10,
}

impl Priority {
    /// Numeric value on the wire.
    pub fn value(self) -> u8 {
        self as u8
    }

    /// Value of the `apns-priority` header.
    pub fn header_value(self) -> String {
        self.value().to_string()
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => f.write_str("low"),
            Self::Medium => f.write_str("medium"),
            Self::Immediate => f.write_str("immediate"),
        }
    }
}

/// Error returned when a priority name or number is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown priority {0:?}, expected low|medium|immediate or 1|5|10")]
pub struct ParsePriorityError(String);

impl FromStr for Priority {
    type Err = ParsePriorityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" | "1" => Ok(Self::Low),
            "medium" | "5" => Ok(Self::Medium),
            "immediate" | "high" | "10" => Ok(Self::Immediate),
            _ => Err(ParsePriorityError(s.to_string())),
        }
    }
}

/// An alert notification addressed to one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    /// Alert title.
    pub title: String,
    /// Optional alert subtitle.
    pub subtitle: Option<String>,
    /// Alert body.
    pub body: String,
    /// Optional app icon badge count.
    pub badge: Option<u32>,
    /// Delivery priority.
    pub priority: Priority,
    /// Device token (routing key).
    pub target_token: String,
    /// App bundle identifier, sent as `apns-topic`.
    pub target_bundle_id: String,
}

impl Payload {
    /// Alert with no subtitle or badge.
    pub fn new(
        title: impl Into<String>,
        body: impl Into<String>,
        priority: Priority,
        target_token: impl Into<String>,
        target_bundle_id: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            subtitle: None,
            body: body.into(),
            badge: None,
            priority,
            target_token: target_token.into(),
            target_bundle_id: target_bundle_id.into(),
        }
    }

    /// Blank payload at low priority, to be filled in field by field.
    pub fn empty() -> Self {
        Self::new("", "", Priority::Low, "", "")
    }

    /// Set the subtitle.
    #[must_use]
    pub fn with_subtitle(mut self, subtitle: impl Into<String>) -> Self {
        self.subtitle = Some(subtitle.into());
        self
    }

    /// Set the badge count.
    #[must_use]
    pub fn with_badge(mut self, badge: u32) -> Self {
        self.badge = Some(badge);
        self
    }

    /// Check the routing fields before a request is built.
    pub fn validate(&self) -> Result<(), PushError> {
        check_field("target_token", &self.target_token)?;
        if self.target_token.contains(['/', '?', '#']) {
            return Err(PushError::InvalidPayload {
                field: "target_token",
                problem: "must not contain URL delimiters",
            });
        }
        check_field("target_bundle_id", &self.target_bundle_id)
    }

    /// Typed APNs envelope borrowing from this payload.
    pub fn envelope(&self) -> Envelope<'_> {
        Envelope {
            aps: Aps {
                alert: Alert {
                    title: &self.title,
                    body: &self.body,
                    subtitle: self.subtitle.as_deref(),
                },
                badge: self.badge,
            },
        }
    }

    /// Serialized request body.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.envelope())
    }
}

fn check_field(field: &'static str, value: &str) -> Result<(), PushError> {
    if value.trim().is_empty() {
        return Err(PushError::InvalidPayload {
            field,
            problem: "must not be empty",
        });
    }
    Ok(())
}

/// `{"aps": {...}}`
#[derive(Debug, Serialize)]
pub struct Envelope<'a> {
    aps: Aps<'a>,
}

#[derive(Debug, Serialize)]
struct Aps<'a> {
    alert: Alert<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    badge: Option<u32>,
}

#[derive(Debug, Serialize)]
struct Alert<'a> {
    title: &'a str,
    body: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    subtitle: Option<&'a str>,
}
