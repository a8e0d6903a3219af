//! Identifier validation and quoting for dynamically built SQL.
//!
//! Table and schema names arrive from requests and from catalog queries and
//! are spliced into statements. Every name passes through
//! [`validate_identifier`] and is then quoted with [`quote_ident`].

use dbclone_core::{Error, Result};

/// PostgreSQL identifier length limit (NAMEDATALEN - 1).
const MAX_IDENTIFIER_LEN: usize = 63;

/// Validate a PostgreSQL identifier (schema or table name).
///
/// Any name PostgreSQL can store is accepted, since every identifier is
/// double-quoted before use. Rejects:
/// - Empty names
/// - Names longer than 63 bytes
/// - Names containing a NUL byte
///
/// # Examples
///
/// ```
/// use dbclone_db::validate_identifier;
///
/// assert!(validate_identifier("table", "lofts").is_ok());
/// assert!(validate_identifier("table", "loft-photos").is_ok());
/// assert!(validate_identifier("table", "").is_err());
/// assert!(validate_identifier("table", "lofts\0").is_err());
/// ```
pub fn validate_identifier(kind: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidInput(format!("{} name cannot be empty", kind)));
    }

    if name.contains('\0') {
        return Err(Error::InvalidInput(format!(
            "{} name contains a null byte: {:?}",
            kind, name
        )));
    }

    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(Error::InvalidInput(format!(
            "{} name exceeds {} byte limit: {} bytes",
            kind,
            MAX_IDENTIFIER_LEN,
            name.len()
        )));
    }

    Ok(())
}

/// Reject schemas that belong to the system catalog.
pub fn validate_schema_name(name: &str) -> Result<()> {
    validate_identifier("Schema", name)?;

    let lowercase = name.to_lowercase();
    const SYSTEM_SCHEMAS: &[&str] = &["pg_catalog", "information_schema", "pg_toast"];
    if SYSTEM_SCHEMAS.contains(&lowercase.as_str()) {
        return Err(Error::InvalidInput(format!(
            "Schema '{}' is a system schema and cannot be cloned",
            name
        )));
    }

    Ok(())
}

/// Double-quote an identifier, escaping embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `"schema"."table"`, validating both parts.
pub fn qualified_name(schema: &str, table: &str) -> Result<String> {
    validate_identifier("Schema", schema)?;
    validate_identifier("Table", table)?;
    Ok(format!("{}.{}", quote_ident(schema), quote_ident(table)))
}
