//! Account operations: create, update (by id or account number) and list with
//! pagination.

use std::path::Path;

use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::auth::Connect;
use crate::client::AccountApi;
use crate::config::{Credentials, is_present};
use crate::error::{AccountError, ApiError, AuthError};
use crate::export;

/// A Salesforce Account row: field name -> scalar value.
pub type AccountRecord = Map<String, Value>;

pub const SOBJECT: &str = "Account";

/// Returned by `create` in dry-run mode instead of a real record id.
pub const DRY_RUN_ID: &str = "dry_run_id";

/// Largest page the query endpoint returns; also the largest `LIMIT` issued.
pub const PAGE_SIZE_CEILING: usize = 2000;

/// Field projection of `list`, in output order.
pub const LIST_FIELDS: [&str; 10] = [
    "Id",
    "Name",
    "Type",
    "Industry",
    "Phone",
    "Website",
    "Domain__c",
    "BillingCity",
    "BillingState",
    "CreatedDate",
];

/// Maps a command-line flag onto an Account field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub flag: &'static str,
    pub field: &'static str,
    pub required_on_create: bool,
    pub updatable: bool,
}

const fn field(
    flag: &'static str,
    field: &'static str,
    required_on_create: bool,
    updatable: bool,
) -> FieldSpec {
    FieldSpec {
        flag,
        field,
        required_on_create,
        updatable,
    }
}

pub const ACCOUNT_FIELDS: &[FieldSpec] = &[
    field("name", "Name", true, true),
    field("type", "Type", false, true),
    field("industry", "Industry", false, true),
    field("phone", "Phone", false, true),
    field("website", "Website", false, true),
    field("billing-street", "BillingStreet", false, true),
    field("billing-city", "BillingCity", false, true),
    field("billing-state", "BillingState", false, true),
    field("billing-postal-code", "BillingPostalCode", false, true),
    field("billing-country", "BillingCountry", false, true),
    field("account-number", "AccountNumber", false, false),
];

pub fn field_for_flag(flag: &str) -> Option<&'static FieldSpec> {
    ACCOUNT_FIELDS.iter().find(|spec| spec.flag == flag)
}

/// Build a record from `(flag, value)` pairs. Values that are absent or blank
/// are skipped, as are flags rejected by `allowed`. Present values are trimmed.
pub fn fields_from_flags<'a>(
    values: impl IntoIterator<Item = (&'a str, Option<&'a str>)>,
    allowed: impl Fn(&FieldSpec) -> bool,
) -> AccountRecord {
    let mut record = AccountRecord::new();
    for (flag, value) in values {
        let Some(value) = value.filter(|v| is_present(v)) else {
            continue;
        };
        if let Some(spec) = field_for_flag(flag).filter(|&spec| allowed(spec)) {
            record.insert(spec.field.to_string(), Value::String(value.trim().to_string()));
        }
    }
    record
}

/// How `update` locates the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierKind {
    /// The record's Salesforce id.
    Id,
    /// The unique `AccountNumber` business key.
    AccountNumber,
}

impl IdentifierKind {
    pub fn field(self) -> &'static str {
        match self {
            Self::Id => "Id",
            Self::AccountNumber => "AccountNumber",
        }
    }
}

/// Result of `list`.
#[derive(Debug, Clone, Default)]
pub struct Listing {
    /// Every fetched record, whether or not it was written to a file.
    pub records: Vec<AccountRecord>,
    /// Bytes written to the output file; `None` if no file was requested or
    /// the write failed.
    pub bytes_written: Option<u64>,
}

/// Create, update and list Account records over a lazily opened session.
pub struct AccountManager<C: Connect> {
    connector: C,
    credentials: Credentials,
    session: Option<C::Session>,
}

impl<C: Connect> AccountManager<C> {
    pub fn new(connector: C, credentials: Credentials) -> Self {
        Self {
            connector,
            credentials,
            session: None,
        }
    }

    /// Authenticate on first use; later calls reuse the session.
    fn session(&mut self) -> Result<&C::Session, AuthError> {
        if self.session.is_none() {
            match self.connector.connect(&self.credentials) {
                Ok(session) => self.session = Some(session),
                Err(e) => {
                    error!("{e}");
                    return Err(e);
                }
            }
        }
        match &self.session {
            Some(session) => Ok(session),
            None => Err(AuthError::Unexpected("session unavailable".into())),
        }
    }

    pub fn create(
        &mut self,
        fields: &AccountRecord,
        dry_run: bool,
    ) -> Result<String, AccountError> {
        let missing: Vec<&str> = ACCOUNT_FIELDS
            .iter()
            .filter(|spec| spec.required_on_create)
            .filter(|spec| !fields.get(spec.field).is_some_and(value_present))
            .map(|spec| spec.field)
            .collect();
        if !missing.is_empty() {
            let msg = format!(
                "Missing required fields for account creation: {}",
                missing.join(", ")
            );
            error!("{msg}");
            return Err(AccountError::Validation(msg));
        }

        let name = fields.get("Name").map(display_value).unwrap_or_default();
        info!("Creating account: {name}");

        if dry_run {
            info!("DRY RUN: Would create account with data: {}", pretty(fields));
            return Ok(DRY_RUN_ID.to_string());
        }

        let session = self.session()?;
        match session.create(SOBJECT, fields) {
            Ok(id) => {
                info!("Successfully created account with ID: {id}");
                Ok(id)
            }
            Err(e) => {
                error!("Error creating account: {e}");
                Err(e.into())
            }
        }
    }

    pub fn update(
        &mut self,
        identifier: &str,
        fields: &AccountRecord,
        kind: IdentifierKind,
        dry_run: bool,
    ) -> Result<(), AccountError> {
        if fields.is_empty() {
            let msg = "No fields to update specified".to_string();
            error!("{msg}");
            return Err(AccountError::Validation(msg));
        }

        if dry_run {
            info!(
                "DRY RUN: Would update account with {} {identifier} with data: {}",
                kind.field(),
                pretty(fields)
            );
            return Ok(());
        }

        let session = self.session()?;
        let account_id = match kind {
            IdentifierKind::Id => identifier.to_string(),
            IdentifierKind::AccountNumber => resolve_id(session, kind.field(), identifier)?,
        };

        info!("Updating account ID: {account_id}");
        match session.update(SOBJECT, &account_id, fields) {
            Ok(204) => {
                info!("Successfully updated account: {account_id}");
                Ok(())
            }
            Ok(status) => {
                warn!("Unexpected response code: {status}");
                Err(AccountError::UnexpectedStatus(status))
            }
            Err(ApiError::NotFound(_)) => {
                let msg = format!("Account not found with ID: {account_id}");
                error!("{msg}");
                Err(AccountError::NotFound(msg))
            }
            Err(e) => {
                error!("Error updating account: {e}");
                Err(e.into())
            }
        }
    }

    /// Fetch accounts, newest first.
    ///
    /// `limit == 0` fetches everything. Up to [`PAGE_SIZE_CEILING`] a single
    /// page is requested with a `LIMIT` clause; above it, continuation cursors
    /// are followed until `limit` records are collected or the results run out.
    pub fn list(
        &mut self,
        limit: usize,
        filter: Option<&str>,
        output: Option<&Path>,
    ) -> Result<Listing, AccountError> {
        let session = self.session()?;
        let query = build_list_query(filter);

        let fetched = if limit == 0 {
            info!("Executing query (fetching ALL records): {query}");
            session.query_all(&query)
        } else if limit > PAGE_SIZE_CEILING {
            info!("Executing query (fetching up to {limit} records): {query}");
            fetch_up_to(session, &query, limit)
        } else {
            let query = format!("{query} LIMIT {limit}");
            info!("Executing query: {query}");
            session.query(&query).map(|page| page.records)
        };
        let records = fetched.map_err(|e| {
            error!("Error listing accounts: {e}");
            AccountError::from(e)
        })?;
        info!("Total accounts retrieved: {}", records.len());

        let bytes_written = output.and_then(|path| {
            match export::write_accounts(&records, path) {
                Ok(bytes) => {
                    info!(
                        "Successfully wrote {} accounts to {}",
                        records.len(),
                        path.display()
                    );
                    Some(bytes)
                }
                Err(e) => {
                    error!("Error writing accounts to file {}: {e:#}", path.display());
                    None
                }
            }
        });

        Ok(Listing {
            records,
            bytes_written,
        })
    }
}

pub fn build_list_query(filter: Option<&str>) -> String {
    let mut query = format!("SELECT {} FROM {SOBJECT}", LIST_FIELDS.join(", "));
    if let Some(filter) = filter.filter(|f| is_present(f)) {
        query.push_str(" WHERE ");
        query.push_str(filter);
    }
    query.push_str(" ORDER BY CreatedDate DESC");
    query
}

fn fetch_up_to(
    api: &impl AccountApi,
    query: &str,
    limit: usize,
) -> Result<Vec<AccountRecord>, ApiError> {
    let mut page = api.query(query)?;
    let mut records = std::mem::take(&mut page.records);
    records.truncate(limit);
    while records.len() < limit {
        let Some(cursor) = page.next_records_url.take() else {
            break;
        };
        debug!("Fetching more records... (retrieved {} so far)", records.len());
        page = api.query_more(&cursor)?;
        let room = limit - records.len();
        records.extend(page.records.drain(..).take(room));
    }
    Ok(records)
}

/// Resolve a unique business key to the record id. Never picks between ties.
fn resolve_id(
    api: &impl AccountApi,
    field: &'static str,
    value: &str,
) -> Result<String, AccountError> {
    let query = format!(
        "SELECT Id, Name FROM {SOBJECT} WHERE {field} = '{}'",
        quote_soql(value)
    );
    debug!("Looking up account: {query}");
    let page = api.query(&query).map_err(|e| {
        error!("Error finding accounts by {field}: {e}");
        AccountError::from(e)
    })?;

    match page.records.as_slice() {
        [] => {
            let msg = format!("No account found with {field}: {value}");
            error!("{msg}");
            Err(AccountError::NotFound(msg))
        }
        [only] => match only.get("Id").and_then(Value::as_str) {
            Some(id) => Ok(id.to_string()),
            None => {
                let msg = format!("Account with {field}: {value} has no Id");
                error!("{msg}");
                Err(AccountError::NotFound(msg))
            }
        },
        many => {
            let err = AccountError::AmbiguousReference {
                field,
                value: value.to_string(),
                matches: many.len(),
            };
            error!("{err}");
            Err(err)
        }
    }
}

/// Escape a value for use inside a single-quoted SOQL string literal.
fn quote_soql(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

fn value_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => is_present(s),
        _ => true,
    }
}

/// Render a scalar the way it is shown to users: strings unquoted, null empty.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn pretty(fields: &AccountRecord) -> String {
    serde_json::to_string_pretty(fields).unwrap_or_else(|_| format!("{fields:?}"))
}
