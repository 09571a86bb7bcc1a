use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;

use crate::errors::{AuthenticateError, Error};
use crate::models::notification::Notification;

/// Pull-based retrieval plus the two read mutations, sharing one HTTP client
/// and auth context. Behind a trait so the engine runs against an in-memory
/// fake in tests.
#[async_trait]
pub trait FetchChannel: Send + Sync {
    /// Current notification list, newest first.
    async fn list_notifications(&self) -> Result<Vec<Notification>, Error>;

    async fn mark_read(&self, id: i64) -> Result<(), Error>;

    async fn mark_all_read(&self) -> Result<(), Error>;
}

/// The server wraps the list in `{ "data": [...] }`, but older deployments
/// return the bare array; accept both.
#[derive(Deserialize)]
#[serde(untagged)]
enum ListBody {
    Enveloped { data: Vec<Notification> },
    Bare(Vec<Notification>),
}

pub struct HttpFetchChannel {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpFetchChannel {
    pub fn new(base_url: &str, token: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn check_status(status: StatusCode, url: &str) -> Result<(), Error> {
        match status {
            StatusCode::UNAUTHORIZED => Err(AuthenticateError::InvalidToken.into()),
            StatusCode::FORBIDDEN => Err(AuthenticateError::Rejected.into()),
            status if status.is_success() => Ok(()),
            status => Err(Error::bad_status(status, url)),
        }
    }
}

#[async_trait]
impl FetchChannel for HttpFetchChannel {
    async fn list_notifications(&self) -> Result<Vec<Notification>, Error> {
        let url = self.url("/notifications");
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await?;
        Self::check_status(response.status(), &url)?;

        let body: ListBody = response.json().await?;
        Ok(match body {
            ListBody::Enveloped { data } => data,
            ListBody::Bare(list) => list,
        })
    }

    async fn mark_read(&self, id: i64) -> Result<(), Error> {
        let url = self.url(&format!("/notifications/{id}/read"));
        let response = self.client.put(&url).bearer_auth(&self.token).send().await?;
        // Any 2xx acknowledges; the body is irrelevant.
        Self::check_status(response.status(), &url)
    }

    async fn mark_all_read(&self) -> Result<(), Error> {
        let url = self.url("/notifications/read-all");
        let response = self.client.put(&url).bearer_auth(&self.token).send().await?;
        Self::check_status(response.status(), &url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ITEM: &str = r#"{
        "id": 5,
        "title": "t",
        "message": "m",
        "type": "leader_invitation",
        "isRead": false,
        "createdAt": "2026-02-10T12:00:00Z"
    }"#;

    #[test]
    fn accepts_enveloped_list_body() {
        let body: ListBody = serde_json::from_str(&format!(r#"{{"data":[{ITEM}]}}"#)).unwrap();
        let ListBody::Enveloped { data } = body else {
            panic!("expected enveloped body");
        };
        assert_eq!(data.len(), 1);
        assert_eq!(data[0].id, 5);
    }

    #[test]
    fn accepts_bare_array_body() {
        let body: ListBody = serde_json::from_str(&format!("[{ITEM}]")).unwrap();
        let ListBody::Bare(list) = body else {
            panic!("expected bare array body");
        };
        assert_eq!(list[0].id, 5);
    }

    #[test]
    fn auth_statuses_map_to_authenticate_errors() {
        let err = HttpFetchChannel::check_status(StatusCode::UNAUTHORIZED, "/x").unwrap_err();
        assert!(err.is_auth());
        let err = HttpFetchChannel::check_status(StatusCode::FORBIDDEN, "/x").unwrap_err();
        assert!(err.is_auth());
        let err = HttpFetchChannel::check_status(StatusCode::BAD_GATEWAY, "/x").unwrap_err();
        assert!(!err.is_auth());
        assert!(HttpFetchChannel::check_status(StatusCode::NO_CONTENT, "/x").is_ok());
    }
}
