//! Pipe-delimited export of listed accounts, one line per record:
//! `Id|Name|Type|Industry|Phone|Website|Domain|BillingCity|BillingState|CreatedDate`.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};

use crate::accounts::{AccountRecord, LIST_FIELDS, display_value};

pub const DELIMITER: char = '|';

/// Write `accounts` to `path`, returning the number of bytes written.
pub fn write_accounts(accounts: &[AccountRecord], path: &Path) -> Result<u64> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut out = BufWriter::new(file);
    let mut written = 0u64;
    for account in accounts {
        let line = format_line(account);
        writeln!(out, "{line}").with_context(|| format!("failed to write {}", path.display()))?;
        written += line.len() as u64 + 1;
    }
    out.flush()
        .with_context(|| format!("failed to flush {}", path.display()))?;
    Ok(written)
}

pub fn format_line(account: &AccountRecord) -> String {
    LIST_FIELDS
        .iter()
        .map(|field| sanitize(&account.get(*field).map(display_value).unwrap_or_default()))
        .collect::<Vec<_>>()
        .join("|")
}

/// Escape backslashes and the delimiter, flatten line breaks and trim.
fn sanitize(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace(DELIMITER, "\\|")
        .replace(['\n', '\r'], " ")
        .trim()
        .to_string()
}

/// Split a line on unescaped delimiters, undoing the `\|` and `\\` escapes.
pub fn split_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if matches!(chars.peek(), Some(&DELIMITER) | Some(&'\\')) => {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            }
            DELIMITER => fields.push(std::mem::take(&mut current)),
            other => current.push(other),
        }
    }
    fields.push(current);
    fields
}
