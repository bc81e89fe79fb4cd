use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::{AppError, AppResult, CorrelationId, PrincipalId};

const CHANNEL_TAG_MAX_LENGTH: usize = 48;

/// Short machine token naming the source of a call (for example `web`, `hl7-feed`).
///
/// Tags are restricted to lowercase ASCII letters, digits, `-`, `_` and `.` so
/// they cannot be used to smuggle free text into audit records.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub struct ChannelTag(String);

impl ChannelTag {
    /// Creates a validated channel tag.
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        let value = value.into();
        if value.is_empty() || value.len() > CHANNEL_TAG_MAX_LENGTH {
            return Err(AppError::Validation(format!(
                "channel tag must be between 1 and {CHANNEL_TAG_MAX_LENGTH} characters"
            )));
        }

        let is_valid = value.chars().all(|character| {
            character.is_ascii_lowercase()
                || character.is_ascii_digit()
                || matches!(character, '-' | '_' | '.')
        });
        if !is_valid {
            return Err(AppError::Validation(format!(
                "channel tag '{value}' contains unsupported characters"
            )));
        }

        Ok(Self(value))
    }

    /// Returns the tag string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl TryFrom<String> for ChannelTag {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl Display for ChannelTag {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.0.as_str())
    }
}

/// Identity and tracing information for one inbound call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    principal_id: PrincipalId,
    channel: ChannelTag,
    correlation_id: CorrelationId,
}

impl RequestContext {
    /// Creates a request context.
    #[must_use]
    pub fn new(
        principal_id: PrincipalId,
        channel: ChannelTag,
        correlation_id: CorrelationId,
    ) -> Self {
        Self {
            principal_id,
            channel,
            correlation_id,
        }
    }

    /// Returns the acting principal.
    #[must_use]
    pub fn principal_id(&self) -> PrincipalId {
        self.principal_id
    }

    /// Returns the channel the call arrived on.
    #[must_use]
    pub fn channel(&self) -> &ChannelTag {
        &self.channel
    }

    /// Returns the caller-supplied correlation identifier.
    #[must_use]
    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    /// Returns a copy of this context with another correlation identifier.
    #[must_use]
    pub fn with_correlation_id(&self, correlation_id: CorrelationId) -> Self {
        Self {
            principal_id: self.principal_id,
            channel: self.channel.clone(),
            correlation_id,
        }
    }
}
