use std::time::Duration;

use reqwest::StatusCode;
use tokio_tungstenite::tungstenite;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Authenticate(#[from] AuthenticateError),

    #[error("{0}")]
    Request(#[from] reqwest::Error),

    #[error("{0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("{0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("Unexpected status {status} from {url}")]
    BadStatus { status: StatusCode, url: String },

    #[error("Push connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("Invalid socket url {url}: {message}")]
    InvalidUrl { url: String, message: String },
}

impl Error {
    pub fn bad_status(status: StatusCode, url: &str) -> Self {
        Error::BadStatus {
            status,
            url: url.to_string(),
        }
    }

    pub fn invalid_url(url: &str, message: &str) -> Self {
        Error::InvalidUrl {
            url: url.to_string(),
            message: message.to_string(),
        }
    }

    /// Auth failures are surfaced to the session owner, never retried here.
    pub fn is_auth(&self) -> bool {
        matches!(self, Error::Authenticate(_))
    }
}

#[derive(thiserror::Error, Debug)]
pub enum AuthenticateError {
    #[error("Invalid authentication credentials")]
    InvalidToken,
    #[error("Authentication rejected by server")]
    Rejected,
}
