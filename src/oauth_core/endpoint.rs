//! Endpoint surfaces over form parameters: token, check_token, revoke and
//! authorize. Each returns a status code and JSON body, leaving the HTTP
//! framework to the caller.

use std::collections::HashMap;
use std::sync::Arc;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};

use super::authorization::AuthorizationServer;
use super::crypto::parse_basic_auth;
use super::error::OAuthError;
use super::types::{parse_scope, GrantType};

/// Custom encode set for application/x-www-form-urlencoded allowing unreserved characters
const FORM_URLENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.').remove(b'~');

/// Encodes key/value pairs as an `application/x-www-form-urlencoded` body.
pub fn encode_form(pairs: &[(&str, &str)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| {
            format!(
                "{}={}",
                utf8_percent_encode(k, FORM_URLENCODE_SET),
                utf8_percent_encode(v, FORM_URLENCODE_SET)
            )
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// Parses a urlencoded body or query string. `+` decodes to a space; a
/// repeated key keeps its first value.
pub fn parse_form(body: &[u8]) -> HashMap<String, String> {
    let body = String::from_utf8_lossy(body);
    let mut params = HashMap::new();
    for pair in body.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        params.entry(decode_component(key)).or_insert_with(|| decode_component(value));
    }
    params
}

fn decode_component(raw: &str) -> String {
    percent_decode_str(&raw.replace('+', " ")).decode_utf8_lossy().into_owned()
}

/// Status, extra headers and JSON body of an endpoint call.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Value,
}

impl EndpointResponse {
    fn ok(body: Value) -> Self {
        Self {
            status: 200,
            headers: vec![("Cache-Control".into(), "no-store".into()), ("Pragma".into(), "no-cache".into())],
            body,
        }
    }

    fn error(err: &OAuthError) -> Self {
        let (status, body) = err.into_response();
        let mut headers = Vec::new();
        if status == 401 {
            headers.push(("WWW-Authenticate".into(), format!("Basic error=\"{}\"", err.error_code())));
        }
        Self { status, headers, body }
    }

    fn redirect(location: String) -> Self {
        Self { status: 302, headers: vec![("Location".into(), location)], body: Value::Null }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

fn required<'a>(params: &'a HashMap<String, String>, name: &str) -> Result<&'a str, OAuthError> {
    params
        .get(name)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| OAuthError::InvalidRequest(format!("missing parameter `{}`", name)))
}

/// Client credentials from HTTP Basic, falling back to `client_id` /
/// `client_secret` form fields. `None` when neither is present.
fn client_credentials(
    params: &HashMap<String, String>,
    authorization: Option<&str>,
) -> Result<Option<(String, String)>, OAuthError> {
    if let Some(header) = authorization {
        let (id, secret) = parse_basic_auth(header)
            .ok_or_else(|| OAuthError::InvalidRequest("malformed Basic authorization header".into()))?;
        if params.get("client_id").is_some_and(|form_id| *form_id != id) {
            return Err(OAuthError::InvalidRequest("client_id does not match Basic credentials".into()));
        }
        return Ok(Some((id, secret)));
    }
    match params.get("client_id").filter(|id| !id.is_empty()) {
        Some(id) => {
            let secret = params.get("client_secret").cloned().unwrap_or_default();
            Ok(Some((id.clone(), secret)))
        }
        None => Ok(None),
    }
}

/// The endpoints a client application and a remote resource server call.
#[derive(Clone)]
pub struct TokenEndpoint {
    server: Arc<AuthorizationServer>,
}

impl TokenEndpoint {
    pub fn new(server: Arc<AuthorizationServer>) -> Self {
        Self { server }
    }

    pub fn server(&self) -> &Arc<AuthorizationServer> {
        &self.server
    }

    /// `POST /oauth/token`.
    #[instrument(skip_all, level = "debug")]
    pub async fn token(&self, params: &HashMap<String, String>, authorization: Option<&str>) -> EndpointResponse {
        match self.try_token(params, authorization).await {
            Ok(body) => EndpointResponse::ok(body),
            Err(err) => EndpointResponse::error(&err),
        }
    }

    async fn try_token(&self, params: &HashMap<String, String>, authorization: Option<&str>) -> Result<Value, OAuthError> {
        let grant: GrantType = required(params, "grant_type")?.parse()?;
        let (client_id, client_secret) = client_credentials(params, authorization)?
            .ok_or_else(|| OAuthError::InvalidRequest("missing client credentials".into()))?;
        let scope = parse_scope(params.get("scope").map(String::as_str).unwrap_or_default());
        debug!(client_id = %client_id, grant_type = %grant, "token request");

        let pair = match grant {
            GrantType::Password => {
                let username = required(params, "username")?;
                let password = params.get("password").map(String::as_str).unwrap_or_default();
                self.server.grant_password(&client_id, &client_secret, username, password, &scope).await?
            }
            GrantType::AuthorizationCode => {
                let code = required(params, "code")?;
                let redirect_uri = required(params, "redirect_uri")?;
                self.server.exchange_code(code, &client_id, &client_secret, redirect_uri).await?
            }
            GrantType::RefreshToken => {
                let refresh_token = required(params, "refresh_token")?;
                self.server.refresh(&client_id, &client_secret, refresh_token).await?
            }
            GrantType::ClientCredentials => {
                self.server.grant_client_credentials(&client_id, &client_secret, &scope).await?
            }
        };
        Ok(serde_json::to_value(pair)?)
    }

    /// `POST /oauth/check_token`. Credentials, when sent, must be valid.
    ///
    /// Failures carry an extra `error_kind` field so a remote verifier can
    /// report the same token error a local one would.
    #[instrument(skip_all, level = "debug")]
    pub async fn check_token(&self, params: &HashMap<String, String>, authorization: Option<&str>) -> EndpointResponse {
        match self.try_check_token(params, authorization).await {
            Ok(body) => EndpointResponse::ok(body),
            Err(err) => {
                let mut response = EndpointResponse::error(&err);
                if let Value::Object(body) = &mut response.body {
                    body.insert("error_kind".into(), Value::String(err.kind().to_string()));
                }
                response
            }
        }
    }

    async fn try_check_token(
        &self,
        params: &HashMap<String, String>,
        authorization: Option<&str>,
    ) -> Result<Value, OAuthError> {
        if let Some((client_id, client_secret)) = client_credentials(params, authorization)? {
            self.server.verify_client(&client_id, &client_secret).await?;
        }
        let token = required(params, "token")?;
        let claims = self.server.check_token(token).await?;
        let mut body = serde_json::to_value(claims)?;
        if let Value::Object(map) = &mut body {
            map.insert("active".into(), Value::Bool(true));
        }
        Ok(body)
    }

    /// `POST /oauth/revoke`; answers 200 with an empty object on success.
    #[instrument(skip_all, level = "debug")]
    pub async fn revoke(&self, params: &HashMap<String, String>, authorization: Option<&str>) -> EndpointResponse {
        match self.try_revoke(params, authorization).await {
            Ok(()) => EndpointResponse::ok(json!({})),
            Err(err) => EndpointResponse::error(&err),
        }
    }

    async fn try_revoke(&self, params: &HashMap<String, String>, authorization: Option<&str>) -> Result<(), OAuthError> {
        let (client_id, client_secret) = client_credentials(params, authorization)?
            .ok_or_else(|| OAuthError::InvalidRequest("missing client credentials".into()))?;
        let token = required(params, "token")?;
        self.server.revoke_token(&client_id, &client_secret, token).await
    }

    /// `GET /oauth/authorize` for a subject that has already logged in and
    /// approved. Redirects with `code` and `state`; errors that cast doubt on
    /// the redirect target itself are answered directly instead.
    #[instrument(skip(self, params), level = "debug")]
    pub async fn authorize(&self, params: &HashMap<String, String>, subject_id: &str) -> EndpointResponse {
        let client_id = match required(params, "client_id") {
            Ok(id) => id,
            Err(err) => return EndpointResponse::error(&err),
        };
        let redirect_uri = match required(params, "redirect_uri") {
            Ok(uri) => uri,
            Err(err) => return EndpointResponse::error(&err),
        };
        let state = params.get("state").map(String::as_str);

        if params.get("response_type").map(String::as_str) != Some("code") {
            let err = OAuthError::InvalidRequest("response_type must be `code`".into());
            return EndpointResponse::error(&err);
        }

        let scope = parse_scope(params.get("scope").map(String::as_str).unwrap_or_default());
        match self.server.initiate_authorization(client_id, subject_id, &scope, redirect_uri).await {
            Ok(code) => {
                let mut pairs = vec![("code", code.code.as_str())];
                pairs.extend(state.map(|s| ("state", s)));
                EndpointResponse::redirect(append_query(redirect_uri, &pairs))
            }
            Err(err @ (OAuthError::UnknownClient | OAuthError::RedirectMismatch)) => EndpointResponse::error(&err),
            Err(err) => {
                warn!(client_id, error = ?err, "authorization request rejected");
                let description = err.description();
                let mut pairs = vec![("error", err.error_code()), ("error_description", description.as_str())];
                pairs.extend(state.map(|s| ("state", s)));
                EndpointResponse::redirect(append_query(redirect_uri, &pairs))
            }
        }
    }
}

fn append_query(uri: &str, pairs: &[(&str, &str)]) -> String {
    let separator = if uri.contains('?') { '&' } else { '?' };
    format!("{}{}{}", uri, separator, encode_form(pairs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn form_round_trip_of_reserved_characters() {
        let body = encode_form(&[("redirect_uri", "http://localhost:8082/index.html"), ("scope", "read write")]);
        assert_eq!(body, "redirect_uri=http%3A%2F%2Flocalhost%3A8082%2Findex.html&scope=read%20write");
        let params = parse_form(body.as_bytes());
        assert_eq!(params["redirect_uri"], "http://localhost:8082/index.html");
        assert_eq!(params["scope"], "read write");
    }

    #[test]
    fn plus_is_space_and_first_value_wins() {
        let params = parse_form(b"scope=read+write&scope=admin&flag");
        assert_eq!(params["scope"], "read write");
        assert_eq!(params["flag"], "");
    }

    #[test]
    fn query_is_appended() {
        assert_eq!(append_query("http://a/cb", &[("code", "x")]), "http://a/cb?code=x");
        assert_eq!(append_query("http://a/cb?v=1", &[("code", "x")]), "http://a/cb?v=1&code=x");
    }
}
