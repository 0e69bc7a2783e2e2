use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// Default page size for the sent-messages endpoint
pub const DEFAULT_SENT_LIMIT: u32 = 10;
/// Upper bound accepted for `limit`
pub const MAX_SENT_LIMIT: u32 = 1000;

/// Query for the sent-messages endpoint
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SentMessagesQuery {
    /// Maximum number of messages to return (1-1000, default 10)
    pub limit: Option<String>,
}

impl SentMessagesQuery {
    /// Resolve the effective limit, or an error message for the client
    pub fn resolve_limit(&self) -> Result<u32, String> {
        let raw = match self.limit.as_deref().map(str::trim) {
            None | Some("") => return Ok(DEFAULT_SENT_LIMIT),
            Some(raw) => raw,
        };

        match raw.parse::<u32>() {
            Ok(limit) if (1..=MAX_SENT_LIMIT).contains(&limit) => Ok(limit),
            _ => Err(format!(
                "invalid limit parameter: must be an integer between 1 and {}",
                MAX_SENT_LIMIT
            )),
        }
    }
}

/// Result of a start/stop request
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ProcessorActionResponse {
    pub message: String,
    /// Lifecycle state after the request
    pub running: bool,
}

/// Current processor state
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ProcessorStatusResponse {
    pub running: bool,
}

/// Error body returned by every failing endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self { error: error.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(limit: Option<&str>) -> SentMessagesQuery {
        SentMessagesQuery {
            limit: limit.map(String::from),
        }
    }

    #[test]
    fn test_resolve_limit() {
        assert_eq!(query(None).resolve_limit(), Ok(10));
        assert_eq!(query(Some("")).resolve_limit(), Ok(10));
        assert_eq!(query(Some("1")).resolve_limit(), Ok(1));
        assert_eq!(query(Some("1000")).resolve_limit(), Ok(1000));
        assert!(query(Some("0")).resolve_limit().is_err());
        assert!(query(Some("1001")).resolve_limit().is_err());
        assert!(query(Some("-5")).resolve_limit().is_err());
        assert!(query(Some("ten")).resolve_limit().is_err());
    }
}
