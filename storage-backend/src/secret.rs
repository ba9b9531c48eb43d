//! Environment lookups with the container-secret fallback: `<VAR>` first,
//! then the contents of the file named by `<VAR>_FILE`.

use std::path::PathBuf;

use crate::error::{Result, StorageError};

pub fn get_secret(var: &str) -> Result<Option<String>> {
    get_secret_with(var, |name| std::env::var(name).ok())
}

pub fn require_secret(var: &str) -> Result<String> {
    get_secret(var)?.ok_or_else(|| StorageError::MissingVariable(var.to_string()))
}

/// Same as [`get_secret`] with a custom variable source.
pub fn get_secret_with<F>(var: &str, lookup: F) -> Result<Option<String>>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup(var).filter(|v| !v.is_empty()) {
        return Ok(Some(value));
    }

    let file_var = format!("{var}_FILE");
    let Some(path) = lookup(&file_var).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };

    let path = PathBuf::from(path);
    let contents = std::fs::read_to_string(&path).map_err(|source| StorageError::SecretFile {
        var: file_var,
        path: path.clone(),
        source,
    })?;
    Ok(Some(contents.trim().to_string()))
}
