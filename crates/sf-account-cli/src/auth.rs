use serde::Deserialize;
use tracing::{debug, info};
use ureq::Agent;

use crate::client::{self, API_VERSION, AccountApi, SalesforceClient, USER_AGENT};
use crate::config::Credentials;
use crate::error::AuthError;

/// Opens an authenticated session from credentials.
pub trait Connect {
    type Session: AccountApi;

    fn connect(&self, credentials: &Credentials) -> Result<Self::Session, AuthError>;
}

/// Logs in against `https://{domain}.salesforce.com`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SalesforceLogin;

impl Connect for SalesforceLogin {
    type Session = SalesforceClient;

    fn connect(&self, credentials: &Credentials) -> Result<SalesforceClient, AuthError> {
        authenticate(credentials)
    }
}

/// Access token plus the instance it is valid for.
#[derive(Debug, PartialEq, Eq)]
struct LoginSession {
    session_id: String,
    instance_url: String,
}

/// Log in with username, password and security token. When the credentials
/// carry a consumer key/secret pair the OAuth username-password flow of the
/// connected app is used, otherwise the SOAP `login` call.
pub fn authenticate(credentials: &Credentials) -> Result<SalesforceClient, AuthError> {
    info!("Authenticating with Salesforce...");
    let agent = client::agent();
    let login_url = login_url(&credentials.domain);
    let session = match credentials.consumer_pair() {
        Some((key, secret)) => oauth_login(&agent, &login_url, credentials, key, secret)?,
        None => soap_login(&agent, &login_url, credentials)?,
    };
    info!("Successfully authenticated with Salesforce");
    debug!("Instance URL: {}", session.instance_url);
    Ok(SalesforceClient::from_agent(
        agent,
        &session.instance_url,
        &session.session_id,
    ))
}

fn login_url(domain: &str) -> String {
    format!("https://{}.salesforce.com", domain.trim())
}

fn unexpected(e: impl std::fmt::Display) -> AuthError {
    AuthError::Unexpected(e.to_string())
}

// -- SOAP login --

fn soap_login(
    agent: &Agent,
    login_url: &str,
    credentials: &Credentials,
) -> Result<LoginSession, AuthError> {
    let url = format!("{login_url}/services/Soap/u/{API_VERSION}");
    let envelope = soap_envelope(
        &credentials.username,
        &format!("{}{}", credentials.password, credentials.security_token),
    );
    let resp = agent
        .post(&url)
        .header("Content-Type", "text/xml; charset=UTF-8")
        .header("SOAPAction", "login")
        .header("User-Agent", USER_AGENT)
        .send(envelope.as_bytes())
        .map_err(unexpected)?;
    let (status, text) = client::read_response(resp).map_err(unexpected)?;
    parse_soap_login(status, &text)
}

fn soap_envelope(username: &str, password: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8" ?>
<env:Envelope xmlns:xsd="http://www.w3.org/2001/XMLSchema" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xmlns:env="http://schemas.xmlsoap.org/soap/envelope/" xmlns:urn="urn:partner.soap.sforce.com">
  <env:Header>
    <urn:CallOptions><urn:client>sf-account-cli</urn:client></urn:CallOptions>
  </env:Header>
  <env:Body>
    <n1:login xmlns:n1="urn:partner.soap.sforce.com">
      <n1:username>{}</n1:username>
      <n1:password>{}</n1:password>
    </n1:login>
  </env:Body>
</env:Envelope>"#,
        xml_escape(username),
        xml_escape(password),
    )
}

fn parse_soap_login(status: u16, text: &str) -> Result<LoginSession, AuthError> {
    if !(200..300).contains(&status) {
        return Err(match element_text(text, "faultstring") {
            Some(fault) => AuthError::Failed(fault),
            None => AuthError::Unexpected(format!("login returned HTTP {status}")),
        });
    }
    let session_id = element_text(text, "sessionId")
        .ok_or_else(|| unexpected("login response has no sessionId"))?;
    let server_url = element_text(text, "serverUrl")
        .ok_or_else(|| unexpected("login response has no serverUrl"))?;
    let instance_url = origin(&server_url)
        .ok_or_else(|| unexpected(format!("unrecognized server URL: {server_url}")))?;
    Ok(LoginSession {
        session_id,
        instance_url: instance_url.to_string(),
    })
}

/// Text of the first non-empty element with local name `tag`, ignoring
/// namespace prefixes and attributes.
fn element_text(xml: &str, tag: &str) -> Option<String> {
    let start = xml.match_indices('<').find_map(|(i, _)| {
        let rest = &xml[i + 1..];
        let name_end = rest.find(|c: char| c == '>' || c == '/' || c.is_whitespace())?;
        let local = rest[..name_end].rsplit(':').next()?;
        if local != tag {
            return None;
        }
        let close = rest.find('>')?;
        (!rest[..close].ends_with('/')).then_some(i + 1 + close + 1)
    })?;
    let len = xml[start..].find("</")?;
    Some(xml_unescape(&xml[start..start + len]))
}

/// `https://host/some/path` -> `https://host`.
fn origin(url: &str) -> Option<&str> {
    let host_start = url.find("://")? + 3;
    match url[host_start..].find('/') {
        Some(i) => Some(&url[..host_start + i]),
        None => Some(url),
    }
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Decode the predefined entities and numeric character references.
/// Unknown or malformed references are kept as written.
fn xml_unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        let decoded = rest
            .find(';')
            .and_then(|end| Some((decode_entity(&rest[1..end])?, end)));
        match decoded {
            Some((c, end)) => {
                out.push(c);
                rest = &rest[end + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(name: &str) -> Option<char> {
    match name {
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "amp" => Some('&'),
        _ => {
            let code = match name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => name.strip_prefix('#')?.parse().ok()?,
            };
            char::from_u32(code)
        }
    }
}

// -- OAuth username-password flow --

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    instance_url: String,
}

#[derive(Deserialize)]
struct TokenError {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

fn oauth_login(
    agent: &Agent,
    login_url: &str,
    credentials: &Credentials,
    consumer_key: &str,
    consumer_secret: &str,
) -> Result<LoginSession, AuthError> {
    let url = format!("{login_url}/services/oauth2/token");
    let password = format!("{}{}", credentials.password, credentials.security_token);
    let resp = agent
        .post(&url)
        .header("User-Agent", USER_AGENT)
        .send_form([
            ("grant_type", "password"),
            ("client_id", consumer_key),
            ("client_secret", consumer_secret),
            ("username", credentials.username.as_str()),
            ("password", password.as_str()),
        ])
        .map_err(unexpected)?;
    let (status, text) = client::read_response(resp).map_err(unexpected)?;
    parse_token_response(status, &text)
}

fn parse_token_response(status: u16, text: &str) -> Result<LoginSession, AuthError> {
    if (200..300).contains(&status) {
        let token: TokenResponse = serde_json::from_str(text).map_err(unexpected)?;
        return Ok(LoginSession {
            session_id: token.access_token,
            instance_url: token.instance_url,
        });
    }
    match serde_json::from_str::<TokenError>(text) {
        Ok(err) => Err(AuthError::Failed(match err.error_description {
            Some(desc) => format!("{}: {desc}", err.error),
            None => err.error,
        })),
        Err(_) => Err(AuthError::Unexpected(format!(
            "token endpoint returned HTTP {status}: {}",
            text.trim()
        ))),
    }
}
