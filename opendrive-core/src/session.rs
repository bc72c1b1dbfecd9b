use log::info;
use reqwest::Method;
use serde::{Deserialize, Serialize};

use crate::client::{OpenDriveClient, OpenDriveError};

/// An authenticated session. The ID is embedded in every later call and never
/// changes for the lifetime of the session.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Session {
    #[serde(rename = "SessionID")]
    session_id: String,
    #[serde(rename = "UserName", default)]
    user_name: Option<String>,
}

impl Session {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            user_name: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.session_id
    }

    pub fn user_name(&self) -> Option<&str> {
        self.user_name.as_deref()
    }
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    passwd: &'a str,
}

impl OpenDriveClient {
    pub async fn login(&self, username: &str, password: &str) -> Result<Session, OpenDriveError> {
        let url = self.endpoint(&["session", "login.json"])?;
        let body = LoginRequest {
            username,
            passwd: password,
        };
        let session: Session = self.call_json(Method::POST, url, Some(&body)).await?;
        info!("started OpenDrive session for {username}");
        Ok(session)
    }
}
