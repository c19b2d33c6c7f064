use std::fmt;

use reqwest::Client;
use serde::Deserialize;
use url::Url;

use crate::client::{Envelope, SynoError, handle_response};

const AUTH_PATH: &str = "/webapi/auth.cgi";
const AUTH_API: &str = "SYNO.API.Auth";
const AUTH_VERSION: &str = "6";
const SESSION_NAME: &str = "FileStation";

#[derive(Clone)]
pub struct Credentials {
    pub account: String,
    pub password: String,
}

impl Credentials {
    pub fn new(account: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("account", &self.account)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A FileStation session id obtained from `SYNO.API.Auth`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub sid: String,
}

#[derive(Debug, Deserialize)]
struct LoginData {
    #[serde(default)]
    sid: Option<String>,
}

pub(crate) async fn login(
    http: &Client,
    base_url: &Url,
    credentials: &Credentials,
) -> Result<Session, SynoError> {
    let mut url = base_url.join(AUTH_PATH)?;
    url.query_pairs_mut()
        .append_pair("api", AUTH_API)
        .append_pair("version", AUTH_VERSION)
        .append_pair("method", "login")
        .append_pair("account", &credentials.account)
        .append_pair("passwd", &credentials.password)
        .append_pair("session", SESSION_NAME)
        .append_pair("format", "sid");
    let response = http.get(url).send().await?;
    let envelope: Envelope<LoginData> = handle_response(response).await?;
    match envelope.into_data() {
        Ok(LoginData { sid: Some(sid) }) if !sid.is_empty() => Ok(Session { sid }),
        Ok(_) => Err(SynoError::MissingData),
        Err(SynoError::Api { code }) => Err(SynoError::Auth { code }),
        Err(err) => Err(err),
    }
}

pub(crate) async fn logout(
    http: &Client,
    base_url: &Url,
    session: &Session,
) -> Result<(), SynoError> {
    let mut url = base_url.join(AUTH_PATH)?;
    url.query_pairs_mut()
        .append_pair("api", AUTH_API)
        .append_pair("version", AUTH_VERSION)
        .append_pair("method", "logout")
        .append_pair("session", SESSION_NAME)
        .append_pair("_sid", &session.sid);
    let response = http.get(url).send().await?;
    let envelope: Envelope<serde_json::Value> = handle_response(response).await?;
    envelope.check().map(|_| ())
}
