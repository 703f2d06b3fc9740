use crate::{RegistryConfig, RegistryError};
use serde::Deserialize;
use std::fmt;
use std::io::Read;
use tracing::debug;

/// Opaque bearer credential. No expiry is tracked.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken {
    value: String,
}

impl AuthToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn authorization(&self) -> String {
        format!("Bearer {}", self.value)
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthToken")
            .field("value", &"<redacted>")
            .finish()
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    token: Option<String>,
}

/// Anonymous pull session for one repository.
///
/// The first call to [`AuthSession::token`] asks the token service for a
/// pull-scoped token; every later call returns the cached value. One session
/// lives for exactly one run.
pub struct AuthSession {
    agent: ureq::Agent,
    auth_url: String,
    service: String,
    scope: String,
    token: Option<AuthToken>,
    requests: usize,
}

impl AuthSession {
    pub fn new(config: &RegistryConfig, repository: &str) -> Self {
        Self {
            agent: config.agent(),
            auth_url: config.auth_url.clone(),
            service: config.auth_service.clone(),
            scope: format!("repository:{repository}:pull"),
            token: None,
            requests: 0,
        }
    }

    /// Session with a pre-issued token; no token request is ever made.
    pub fn with_token(config: &RegistryConfig, repository: &str, token: AuthToken) -> Self {
        let mut session = Self::new(config, repository);
        session.token = Some(token);
        session
    }

    /// Number of token requests issued so far.
    pub fn requests_made(&self) -> usize {
        self.requests
    }

    pub fn token(&mut self) -> Result<&AuthToken, RegistryError> {
        let token = match self.token.take() {
            Some(cached) => cached,
            None => self.request_token()?,
        };
        Ok(self.token.insert(token))
    }

    fn request_token(&mut self) -> Result<AuthToken, RegistryError> {
        self.requests += 1;
        debug!("GET {} (scope {})", self.auth_url, self.scope);

        let resp = match self
            .agent
            .get(&self.auth_url)
            .query("service", &self.service)
            .query("scope", &self.scope)
            .call()
        {
            Ok(r) => r,
            Err(ureq::Error::StatusCode(code)) => {
                return Err(RegistryError::Auth(format!(
                    "HTTP {code} from {}",
                    self.auth_url
                )));
            }
            Err(e) => {
                return Err(RegistryError::Auth(format!("{}: {e}", self.auth_url)));
            }
        };

        let code = resp.status().as_u16();
        if !(200..300).contains(&code) {
            return Err(RegistryError::Auth(format!(
                "HTTP {code} from {}",
                self.auth_url
            )));
        }

        let mut body = Vec::new();
        resp.into_body()
            .into_reader()
            .read_to_end(&mut body)
            .map_err(|e| RegistryError::Auth(format!("reading token response: {e}")))?;

        let parsed: TokenResponse = serde_json::from_slice(&body)
            .map_err(|e| RegistryError::Auth(format!("malformed token response: {e}")))?;
        let value = parsed
            .access_token
            .or(parsed.token)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| RegistryError::Auth("token response has no token field".to_owned()))?;

        debug!("obtained bearer token for {}", self.scope);
        Ok(AuthToken::new(value))
    }
}
