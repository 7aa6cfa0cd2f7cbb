//! Upstream handshake header strategies.
//!
//! A strategy is chosen once at startup and turns the client's upgrade request
//! into the header set attached to the upstream handshake.

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::header::{AUTHORIZATION, ORIGIN, USER_AGENT};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use wsrelay_settings::{AuthMode, AuthSettings};

use crate::error::{RelayError, Result};

/// Request metadata visible to a strategy.
#[derive(Clone, Debug, Default)]
pub struct ClientRequest {
    /// Decoded query-string parameters.
    pub query: HashMap<String, String>,
    /// Upgrade request headers.
    pub headers: HeaderMap,
}

impl ClientRequest {
    /// Build from parts.
    pub fn new(query: HashMap<String, String>, headers: HeaderMap) -> Self {
        Self { query, headers }
    }

    /// The `Origin` header, if present and valid UTF-8.
    pub fn origin(&self) -> Option<&str> {
        self.headers.get(ORIGIN).and_then(|v| v.to_str().ok())
    }

    /// A non-empty query parameter.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.query
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

/// Derives the upstream header set for one session.
pub trait HeaderStrategy: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Headers for the upstream handshake, or why the request is refused.
    fn upstream_headers(&self, req: &ClientRequest) -> Result<HeaderMap>;
}

/// Forwards the client's query-string token as `Authorization: Bearer`.
#[derive(Clone, Debug)]
pub struct BearerForwarding {
    /// Query parameter holding the token.
    pub token_param: String,
    /// `User-Agent` sent upstream.
    pub user_agent: String,
}

impl HeaderStrategy for BearerForwarding {
    fn name(&self) -> &'static str {
        "bearer"
    }

    fn upstream_headers(&self, req: &ClientRequest) -> Result<HeaderMap> {
        let token = req
            .param(&self.token_param)
            .ok_or_else(|| RelayError::MissingCredential {
                param: self.token_param.clone(),
            })?;

        let mut headers = HeaderMap::new();
        insert(&mut headers, AUTHORIZATION, &format!("Bearer {token}"))?;
        insert(&mut headers, USER_AGENT, &self.user_agent)?;
        Ok(headers)
    }
}

/// Presents a fixed identity regardless of the client.
#[derive(Clone, Debug)]
pub struct FixedIdentity {
    /// `User-Agent` sent upstream.
    pub user_agent: String,
    /// `Origin` sent upstream, when set.
    pub origin: Option<String>,
}

impl HeaderStrategy for FixedIdentity {
    fn name(&self) -> &'static str {
        "fixed"
    }

    fn upstream_headers(&self, _req: &ClientRequest) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        insert(&mut headers, USER_AGENT, &self.user_agent)?;
        if let Some(origin) = &self.origin {
            insert(&mut headers, ORIGIN, origin)?;
        }
        Ok(headers)
    }
}

fn insert(headers: &mut HeaderMap, name: HeaderName, value: &str) -> Result<()> {
    let value = HeaderValue::from_str(value).map_err(|_| RelayError::InvalidHeader {
        name: name.as_str().to_owned(),
    })?;
    let _ = headers.insert(name, value);
    Ok(())
}

/// Strategy for the configured auth mode.
pub fn strategy_from_settings(auth: &AuthSettings) -> Arc<dyn HeaderStrategy> {
    match auth.mode {
        AuthMode::Bearer => Arc::new(BearerForwarding {
            token_param: auth.token_param.clone(),
            user_agent: auth.user_agent.clone(),
        }),
        AuthMode::Fixed => Arc::new(FixedIdentity {
            user_agent: auth.user_agent.clone(),
            origin: auth.origin.clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn request(pairs: &[(&str, &str)]) -> ClientRequest {
        let query = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        ClientRequest::new(query, HeaderMap::new())
    }

    fn bearer() -> BearerForwarding {
        BearerForwarding {
            token_param: "token".into(),
            user_agent: "WhiteWeb/1.0.0".into(),
        }
    }

    #[test]
    fn bearer_attaches_authorization_and_user_agent() {
        let headers = bearer()
            .upstream_headers(&request(&[("token", "tok123")]))
            .unwrap();
        assert_eq!(headers[AUTHORIZATION], "Bearer tok123");
        assert_eq!(headers[USER_AGENT], "WhiteWeb/1.0.0");
        assert!(headers.get(ORIGIN).is_none());
    }

    #[test]
    fn bearer_requires_token() {
        let err = bearer().upstream_headers(&request(&[])).unwrap_err();
        assert_matches!(err, RelayError::MissingCredential { param } if param == "token");
    }

    #[test]
    fn bearer_treats_empty_token_as_missing() {
        let err = bearer()
            .upstream_headers(&request(&[("token", "")]))
            .unwrap_err();
        assert_matches!(err, RelayError::MissingCredential { .. });
    }

    #[test]
    fn bearer_honors_custom_param() {
        let strategy = BearerForwarding {
            token_param: "access_token".into(),
            user_agent: "Relay/2".into(),
        };
        let headers = strategy
            .upstream_headers(&request(&[("access_token", "abc")]))
            .unwrap();
        assert_eq!(headers[AUTHORIZATION], "Bearer abc");
        assert!(strategy.upstream_headers(&request(&[("token", "abc")])).is_err());
    }

    #[test]
    fn bearer_rejects_control_characters() {
        let err = bearer()
            .upstream_headers(&request(&[("token", "bad\nvalue")]))
            .unwrap_err();
        assert_matches!(err, RelayError::InvalidHeader { ref name } if name == "authorization");
        assert_eq!(err.close_info().code, 4001);
    }

    #[test]
    fn fixed_sends_origin_and_user_agent() {
        let strategy = FixedIdentity {
            user_agent: "WhiteWeb/1.0.0".into(),
            origin: Some("https://app.example".into()),
        };
        let headers = strategy.upstream_headers(&request(&[])).unwrap();
        assert_eq!(headers[USER_AGENT], "WhiteWeb/1.0.0");
        assert_eq!(headers[ORIGIN], "https://app.example");
        assert!(headers.get(AUTHORIZATION).is_none());
    }

    #[test]
    fn fixed_without_origin_omits_it() {
        let strategy = FixedIdentity {
            user_agent: "UA".into(),
            origin: None,
        };
        let headers = strategy.upstream_headers(&request(&[("token", "x")])).unwrap();
        assert!(headers.get(ORIGIN).is_none());
        assert!(headers.get(AUTHORIZATION).is_none());
    }

    #[test]
    fn strategy_follows_mode() {
        let mut auth = AuthSettings::default();
        assert_eq!(strategy_from_settings(&auth).name(), "bearer");
        auth.mode = AuthMode::Fixed;
        assert_eq!(strategy_from_settings(&auth).name(), "fixed");
    }

    #[test]
    fn origin_accessor_reads_header() {
        let mut headers = HeaderMap::new();
        let _ = headers.insert(ORIGIN, HeaderValue::from_static("https://a.example"));
        let req = ClientRequest::new(HashMap::new(), headers);
        assert_eq!(req.origin(), Some("https://a.example"));
    }
}
