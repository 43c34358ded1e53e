use percent_encoding::{AsciiSet, CONTROLS, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use ureq::{Agent, http};

use crate::accounts::AccountRecord;
use crate::error::ApiError;

pub const API_VERSION: &str = "59.0";
pub(crate) const USER_AGENT: &str = concat!("sf-account-cli/", env!("CARGO_PKG_VERSION"));

/// Characters that must be percent-encoded in a URL path segment.
const PATH_SEGMENT: &AsciiSet = &CONTROLS.add(b' ').add(b'#').add(b'%').add(b'/').add(b'?');

/// Characters that must be percent-encoded in the `q` query parameter.
const QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

fn encode_path(s: &str) -> String {
    utf8_percent_encode(s, PATH_SEGMENT).to_string()
}

fn encode_query(s: &str) -> String {
    utf8_percent_encode(s, QUERY_VALUE).to_string()
}

/// Blocking agent shared by the login and data calls. Non-2xx statuses are
/// returned as responses so their bodies can be inspected.
pub(crate) fn agent() -> Agent {
    Agent::config_builder()
        .http_status_as_error(false)
        .build()
        .into()
}

/// One page of a SOQL query.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPage {
    #[serde(default)]
    pub records: Vec<AccountRecord>,
    #[serde(default)]
    pub total_size: u64,
    #[serde(default)]
    pub done: bool,
    /// Continuation cursor, present while more pages remain.
    #[serde(default)]
    pub next_records_url: Option<String>,
}

/// The remote operations the account manager depends on.
pub trait AccountApi {
    /// Create a record, returning the id assigned by the remote store.
    fn create(&self, sobject: &str, fields: &AccountRecord) -> Result<String, ApiError>;

    /// Update a record, returning the HTTP status of the call.
    fn update(&self, sobject: &str, id: &str, fields: &AccountRecord) -> Result<u16, ApiError>;

    fn query(&self, soql: &str) -> Result<QueryPage, ApiError>;

    fn query_more(&self, cursor: &str) -> Result<QueryPage, ApiError>;

    /// Run a query and follow every continuation cursor.
    fn query_all(&self, soql: &str) -> Result<Vec<AccountRecord>, ApiError> {
        let mut page = self.query(soql)?;
        let mut records = std::mem::take(&mut page.records);
        while let Some(cursor) = page.next_records_url.take() {
            page = self.query_more(&cursor)?;
            records.append(&mut page.records);
        }
        Ok(records)
    }
}

/// An authenticated REST session against one Salesforce instance.
pub struct SalesforceClient {
    agent: Agent,
    instance_url: String,
    bearer: String,
}

impl std::fmt::Debug for SalesforceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SalesforceClient")
            .field("instance_url", &self.instance_url)
            .field("bearer", &"[redacted]")
            .finish()
    }
}

#[derive(Deserialize)]
struct CreateResponse {
    id: String,
}

impl SalesforceClient {
    pub(crate) fn from_agent(agent: Agent, instance_url: &str, session_id: &str) -> Self {
        Self {
            agent,
            instance_url: instance_url.trim_end_matches('/').to_string(),
            bearer: format!("Bearer {session_id}"),
        }
    }

    pub fn instance_url(&self) -> &str {
        &self.instance_url
    }

    fn data_url(&self, path: &str) -> String {
        format!("{}/services/data/v{API_VERSION}{path}", self.instance_url)
    }

    fn get(&self, url: &str) -> Result<Value, ApiError> {
        debug!("GET {url}");
        let resp = self
            .agent
            .get(url)
            .header("Authorization", &self.bearer)
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/json")
            .call()?;
        let (status, text) = read_response(resp)?;
        parse_response(status, &text)
    }

    fn post_json(&self, url: &str, body: &impl Serialize) -> Result<Value, ApiError> {
        debug!("POST {url}");
        let bytes = serde_json::to_vec(body)?;
        let resp = self
            .agent
            .post(url)
            .header("Authorization", &self.bearer)
            .header("User-Agent", USER_AGENT)
            .header("Content-Type", "application/json")
            .send(&bytes[..])?;
        let (status, text) = read_response(resp)?;
        parse_response(status, &text)
    }

    fn patch_json(&self, url: &str, body: &impl Serialize) -> Result<u16, ApiError> {
        debug!("PATCH {url}");
        let bytes = serde_json::to_vec(body)?;
        let resp = self
            .agent
            .patch(url)
            .header("Authorization", &self.bearer)
            .header("User-Agent", USER_AGENT)
            .header("Content-Type", "application/json")
            .send(&bytes[..])?;
        let (status, text) = read_response(resp)?;
        parse_response(status, &text)?;
        Ok(status)
    }

    fn query_more_url(&self, cursor: &str) -> String {
        if cursor.starts_with('/') {
            format!("{}{cursor}", self.instance_url)
        } else {
            self.data_url(&format!("/query/{}", encode_path(cursor)))
        }
    }
}

impl AccountApi for SalesforceClient {
    fn create(&self, sobject: &str, fields: &AccountRecord) -> Result<String, ApiError> {
        let url = self.data_url(&format!("/sobjects/{}/", encode_path(sobject)));
        let body = self.post_json(&url, fields)?;
        let created: CreateResponse = serde_json::from_value(body)?;
        Ok(created.id)
    }

    fn update(&self, sobject: &str, id: &str, fields: &AccountRecord) -> Result<u16, ApiError> {
        let url = self.data_url(&format!(
            "/sobjects/{}/{}",
            encode_path(sobject),
            encode_path(id)
        ));
        self.patch_json(&url, fields)
    }

    fn query(&self, soql: &str) -> Result<QueryPage, ApiError> {
        let url = self.data_url(&format!("/query/?q={}", encode_query(soql)));
        Ok(serde_json::from_value(self.get(&url)?)?)
    }

    fn query_more(&self, cursor: &str) -> Result<QueryPage, ApiError> {
        let url = self.query_more_url(cursor);
        Ok(serde_json::from_value(self.get(&url)?)?)
    }
}

pub(crate) fn read_response(
    mut resp: http::Response<ureq::Body>,
) -> Result<(u16, String), ApiError> {
    let status = resp.status().as_u16();
    let text = resp.body_mut().read_to_string()?;
    Ok((status, text))
}

fn parse_response(status: u16, text: &str) -> Result<Value, ApiError> {
    if (200..300).contains(&status) {
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        return Ok(serde_json::from_str::<Value>(text)
            .unwrap_or_else(|_| Value::String(text.to_string())));
    }
    let message = error_message(text);
    if status == 404 {
        Err(ApiError::NotFound(message))
    } else {
        Err(ApiError::Status { status, message })
    }
}

/// Salesforce reports errors as `[{"message", "errorCode"}, ...]`; fold them
/// into one line, falling back to the raw body.
fn error_message(text: &str) -> String {
    let describe = |e: &Value| {
        let message = e.get("message").and_then(Value::as_str)?;
        Some(match e.get("errorCode").and_then(Value::as_str) {
            Some(code) => format!("{code}: {message}"),
            None => message.to_string(),
        })
    };
    let folded = match serde_json::from_str::<Value>(text) {
        Ok(Value::Array(errors)) => errors
            .iter()
            .filter_map(describe)
            .collect::<Vec<_>>()
            .join("; "),
        Ok(body) => describe(&body).unwrap_or_default(),
        Err(_) => String::new(),
    };
    if folded.is_empty() {
        text.trim().to_string()
    } else {
        folded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client() -> SalesforceClient {
        SalesforceClient::from_agent(agent(), "https://na1.salesforce.com/", "sess")
    }

    #[test]
    fn encode_path_preserves_safe_chars() {
        assert_eq!(encode_path("001XX000003DHP0"), "001XX000003DHP0");
    }

    #[test]
    fn encode_path_encodes_unsafe_chars() {
        assert_eq!(encode_path("a/b?c#d e"), "a%2Fb%3Fc%23d%20e");
    }

    #[test]
    fn encode_query_escapes_soql() {
        assert_eq!(
            encode_query("SELECT Id FROM Account WHERE Type='Customer'"),
            "SELECT%20Id%20FROM%20Account%20WHERE%20Type%3D%27Customer%27"
        );
    }

    #[test]
    fn data_url_uses_trimmed_instance() {
        let c = client();
        assert_eq!(c.instance_url(), "https://na1.salesforce.com");
        assert_eq!(
            c.data_url("/sobjects/Account/"),
            "https://na1.salesforce.com/services/data/v59.0/sobjects/Account/"
        );
    }

    #[test]
    fn query_more_url_accepts_next_records_url() {
        let c = client();
        assert_eq!(
            c.query_more_url("/services/data/v59.0/query/01gD0000002HU6KIAW-2000"),
            "https://na1.salesforce.com/services/data/v59.0/query/01gD0000002HU6KIAW-2000"
        );
    }

    #[test]
    fn query_more_url_accepts_bare_locator() {
        let c = client();
        assert_eq!(
            c.query_more_url("01gD0000002HU6KIAW-2000"),
            "https://na1.salesforce.com/services/data/v59.0/query/01gD0000002HU6KIAW-2000"
        );
    }

    #[test]
    fn debug_redacts_bearer() {
        let dbg = format!("{:?}", client());
        assert!(!dbg.contains("sess"));
        assert!(dbg.contains("[redacted]"));
    }

    #[test]
    fn parse_response_success_json() {
        let result = parse_response(201, r#"{"id": "001A", "success": true}"#).unwrap();
        assert_eq!(result["id"], "001A");
    }

    #[test]
    fn parse_response_no_content() {
        assert_eq!(parse_response(204, "").unwrap(), Value::Null);
    }

    #[test]
    fn parse_response_404_is_not_found() {
        let err = parse_response(
            404,
            r#"[{"errorCode": "NOT_FOUND", "message": "The requested resource does not exist"}]"#,
        )
        .unwrap_err();
        match err {
            ApiError::NotFound(msg) => assert!(msg.contains("NOT_FOUND")),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn parse_response_error_folds_error_array() {
        let err = parse_response(
            400,
            r#"[{"errorCode": "MALFORMED_QUERY", "message": "unexpected token"},
                {"errorCode": "OTHER", "message": "second"}]"#,
        )
        .unwrap_err();
        let text = err.to_string();
        assert!(text.contains("400"));
        assert!(text.contains("MALFORMED_QUERY: unexpected token; OTHER: second"));
    }

    #[test]
    fn parse_response_error_with_message_object() {
        let err = parse_response(401, r#"{"message": "Session expired"}"#).unwrap_err();
        assert!(err.to_string().contains("Session expired"));
    }

    #[test]
    fn parse_response_error_non_json() {
        let err = parse_response(500, "Internal Server Error").unwrap_err();
        assert!(err.to_string().contains("500"));
        assert!(err.to_string().contains("Internal Server Error"));
    }

    #[test]
    fn query_page_deserializes_cursor() {
        let page: QueryPage = serde_json::from_value(json!({
            "totalSize": 3000,
            "done": false,
            "nextRecordsUrl": "/services/data/v59.0/query/01g-2000",
            "records": [{"attributes": {"type": "Account"}, "Id": "001A", "Name": "Acme"}]
        }))
        .unwrap();
        assert_eq!(page.total_size, 3000);
        assert!(!page.done);
        assert_eq!(
            page.next_records_url.as_deref(),
            Some("/services/data/v59.0/query/01g-2000")
        );
        assert_eq!(page.records[0]["Name"], "Acme");
    }

    #[test]
    fn query_page_last_page_has_no_cursor() {
        let page: QueryPage =
            serde_json::from_value(json!({"totalSize": 1, "done": true, "records": []})).unwrap();
        assert!(page.next_records_url.is_none());
    }
}
