//! Partial-update bodies where an absent key and an explicit `null` differ.

use serde_json::Value;

use crate::error::{AppError, AppResult};

#[derive(Debug, PartialEq, Eq)]
pub enum FieldUpdate {
    Omitted,
    Cleared,
    Set(String),
}

impl FieldUpdate {
    /// Reads the first of `keys` present in `body`. Anything other than a
    /// string or `null` is rejected.
    pub fn read(body: &Value, keys: &[&str]) -> AppResult<Self> {
        let Some((key, value)) = keys
            .iter()
            .find_map(|key| body.get(*key).map(|value| (*key, value)))
        else {
            return Ok(FieldUpdate::Omitted);
        };

        match value {
            Value::Null => Ok(FieldUpdate::Cleared),
            Value::String(text) => Ok(FieldUpdate::Set(text.trim().to_string())),
            other => Err(AppError::bad_request(format!(
                "{key} must be a string or null, got {other}"
            ))),
        }
    }

    /// Like [`FieldUpdate::read`] for columns that cannot be cleared:
    /// `null` and blank strings are both rejected.
    pub fn read_required(body: &Value, key: &str) -> AppResult<Option<String>> {
        match Self::read(body, &[key])? {
            FieldUpdate::Omitted => Ok(None),
            FieldUpdate::Set(text) if !text.is_empty() => Ok(Some(text)),
            FieldUpdate::Set(_) | FieldUpdate::Cleared => {
                Err(AppError::bad_request(format!("{key} must not be empty")))
            }
        }
    }
}
