use std::fmt;

/// Failure of a call to the policy-administration service.
///
/// `status` is `None` for transport failures and for calls that never left
/// the client (no session token).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestError {
    pub status: Option<u16>,
    pub message: String,
}

pub type RequestResult<T> = std::result::Result<T, RequestError>;

impl RequestError {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn unauthenticated() -> Self {
        Self::new(None, "no active session")
    }

    pub(crate) fn transport(context: &str, err: &reqwest::Error) -> Self {
        Self::new(None, format!("{context}: {err}"))
    }
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "request failed ({status}): {}", self.message),
            None => write!(f, "request failed: {}", self.message),
        }
    }
}

impl std::error::Error for RequestError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_status_when_present() {
        let err = RequestError::new(Some(403), "forbidden");
        assert_eq!(err.to_string(), "request failed (403): forbidden");
        let err = RequestError::new(None, "connection refused");
        assert_eq!(err.to_string(), "request failed: connection refused");
    }

    #[test]
    fn unauthenticated_has_no_status() {
        let err = RequestError::unauthenticated();
        assert_eq!(err.status, None);
        assert_eq!(err.message, "no active session");
    }
}
