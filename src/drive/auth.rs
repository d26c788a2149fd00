//! OAuth tokens for the Drive API.
//!
//! A token file is reused while its access token is valid. An expired token
//! is refreshed; when that fails, or there is no token file, the installed
//! app flow asks the user to authorize in a browser and redirects back to a
//! loopback listener. Whatever token comes out is written back to the file.

use crate::error::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::path::Path;
use tracing::{debug, info, warn};

pub const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";

/// seconds before expiry at which a token counts as expired
const EXPIRY_MARGIN_SECS: i64 = 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expiry: Option<DateTime<Utc>>,
}

impl Token {
    /// tokens without an expiry never expire
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        match self.expiry {
            Some(expiry) => expiry - Duration::seconds(EXPIRY_MARGIN_SECS) > now,
            None => true,
        }
    }

    /// `None` when the file does not exist or cannot be parsed
    pub fn load(path: &Path) -> Result<Option<Token>> {
        if !path.exists() {
            return Ok(None);
        }
        match serde_json::from_str(&fs::read_to_string(path)?) {
            Ok(token) => Ok(Some(token)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unreadable token file");
                Ok(None)
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }
}

pub trait OAuthFlow {
    fn refresh(&self, refresh_token: &str) -> Result<Token>;
    /// interactive authorization
    fn authorize(&self) -> Result<Token>;
}

/// a usable token for `token_path`, refreshing or authorizing as needed
pub fn acquire_token<F: OAuthFlow + ?Sized>(
    flow: &F,
    token_path: &Path,
    now: DateTime<Utc>,
) -> Result<Token> {
    let stored = Token::load(token_path)?;

    let token = match stored {
        Some(token) if token.is_valid_at(now) => {
            debug!(path = %token_path.display(), "using stored token");
            return Ok(token);
        }
        Some(Token {
            refresh_token: Some(refresh_token),
            ..
        }) => match flow.refresh(&refresh_token) {
            Ok(mut token) => {
                info!("refreshed access token");
                token.refresh_token.get_or_insert(refresh_token);
                token
            }
            Err(e) => {
                warn!(error = %e, "token refresh failed, authorizing again");
                flow.authorize()?
            }
        },
        _ => {
            info!("no usable token, authorizing");
            flow.authorize()?
        }
    };

    token.save(token_path)?;
    Ok(token)
}

#[derive(Debug, Clone, Deserialize)]
struct ClientSecret {
    client_id: String,
    client_secret: String,
    auth_uri: String,
    token_uri: String,
}

#[derive(Debug, Deserialize)]
struct SecretsFile {
    #[serde(alias = "web")]
    installed: ClientSecret,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

impl TokenResponse {
    fn into_token(self) -> Token {
        Token {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expiry: self.expires_in.map(|s| Utc::now() + Duration::seconds(s)),
        }
    }
}

/// Installed-application flow against the endpoints of a client secrets file.
pub struct InstalledAppFlow {
    http: reqwest::blocking::Client,
    secret: ClientSecret,
    scope: String,
}

impl InstalledAppFlow {
    pub fn from_secrets_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::Auth(format!(
                "client secrets file not found: {}",
                path.display()
            )));
        }
        let file: SecretsFile = serde_json::from_str(&fs::read_to_string(path)?)?;
        Ok(Self {
            http: reqwest::blocking::Client::new(),
            secret: file.installed,
            scope: DRIVE_SCOPE.to_string(),
        })
    }

    fn token_request(&self, params: &[(&str, &str)]) -> Result<Token> {
        let response = self.http.post(&self.secret.token_uri).form(params).send()?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(Error::Auth(format!("token endpoint answered {status}: {body}")));
        }
        Ok(response.json::<TokenResponse>()?.into_token())
    }

    fn consent_url(&self, redirect_uri: &str, state: &str) -> Result<Url> {
        Url::parse_with_params(
            &self.secret.auth_uri,
            &[
                ("client_id", self.secret.client_id.as_str()),
                ("redirect_uri", redirect_uri),
                ("response_type", "code"),
                ("scope", self.scope.as_str()),
                ("access_type", "offline"),
                ("prompt", "consent"),
                ("state", state),
            ],
        )
        .map_err(|e| Error::Auth(format!("invalid auth_uri: {e}")))
    }
}

impl OAuthFlow for InstalledAppFlow {
    fn refresh(&self, refresh_token: &str) -> Result<Token> {
        self.token_request(&[
            ("client_id", self.secret.client_id.as_str()),
            ("client_secret", self.secret.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ])
    }

    fn authorize(&self) -> Result<Token> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let redirect_uri = format!("http://127.0.0.1:{}/", listener.local_addr()?.port());
        let state = new_state();

        let url = self.consent_url(&redirect_uri, &state)?;
        info!(%url, "open this URL in a browser to authorize Drive access");

        let (mut stream, _) = listener.accept()?;
        let mut request_line = String::new();
        BufReader::new(&stream).read_line(&mut request_line)?;
        let code = authorization_code(&request_line, &state);

        let body = match &code {
            Ok(_) => "Authorization complete. You can close this window.",
            Err(_) => "Authorization failed. Check the terminal for details.",
        };
        write!(
            stream,
            "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        )?;

        let code = code?;
        self.token_request(&[
            ("code", code.as_str()),
            ("client_id", self.secret.client_id.as_str()),
            ("client_secret", self.secret.client_secret.as_str()),
            ("redirect_uri", redirect_uri.as_str()),
            ("grant_type", "authorization_code"),
        ])
    }
}

/// random anti-forgery token echoed back on the redirect
fn new_state() -> String {
    Uuid::new_v4().simple().to_string()
}

/// the `code` query parameter of the redirect's request line
fn authorization_code(request_line: &str, expected_state: &str) -> Result<String> {
    let target = request_line
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| Error::Auth("malformed redirect request".into()))?;
    let url = Url::parse(&format!("http://127.0.0.1{target}"))
        .map_err(|e| Error::Auth(format!("malformed redirect request: {e}")))?;

    let mut code = None;
    let mut state = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => return Err(Error::Auth(format!("authorization denied: {value}"))),
            _ => {}
        }
    }
    if state.as_deref() != Some(expected_state) {
        return Err(Error::Auth("authorization state mismatch".into()));
    }
    code.ok_or_else(|| Error::Auth("redirect carries no authorization code".into()))
}
