/// Failures reported by the fetch capability and the bus API client
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NetworkError {
    #[error("API access key is missing or was rejected")]
    AccessKey,
    #[error("Invalid request URL: {0}")]
    Url(String),
    #[error("Unknown network error: {0}")]
    Unknown(String),
    #[error("No data available for this request")]
    NoData,
    #[error("No response from server")]
    NoResponse,
    #[error("Unexpected response: {0}")]
    Response(String),
    #[error("Request quota exceeded")]
    TrafficExceed,
}

/// How an alarm session reacts to a failed poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retried on the next scheduled tick
    Transient,
    /// Retrying with the same key cannot succeed
    Fatal,
    /// The alarm can never succeed for this route
    Unsupported,
}

impl NetworkError {
    pub fn class(&self) -> ErrorClass {
        match self {
            NetworkError::AccessKey | NetworkError::TrafficExceed => ErrorClass::Fatal,
            NetworkError::NoData => ErrorClass::Unsupported,
            NetworkError::Url(_)
            | NetworkError::Unknown(_)
            | NetworkError::NoResponse
            | NetworkError::Response(_) => ErrorClass::Transient,
        }
    }
}

impl From<reqwest::Error> for NetworkError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            NetworkError::NoResponse
        } else if err.is_builder() {
            NetworkError::Url(err.to_string())
        } else if let Some(status) = err.status() {
            NetworkError::Response(status.to_string())
        } else {
            NetworkError::Unknown(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_and_key_errors_are_fatal() {
        assert_eq!(NetworkError::TrafficExceed.class(), ErrorClass::Fatal);
        assert_eq!(NetworkError::AccessKey.class(), ErrorClass::Fatal);
    }

    #[test]
    fn no_data_is_terminal_and_the_rest_retry() {
        assert_eq!(NetworkError::NoData.class(), ErrorClass::Unsupported);
        assert_eq!(NetworkError::NoResponse.class(), ErrorClass::Transient);
        assert_eq!(
            NetworkError::Response("502 Bad Gateway".into()).class(),
            ErrorClass::Transient
        );
    }
}
