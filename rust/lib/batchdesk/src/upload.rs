//! Client-side checks for bulk operations: upload file validation and the
//! typed confirmation that gates destructive actions.

use serde_json::Value;

use crate::error::DeskError;

/// Phrase the user must type to confirm a destructive bulk action.
pub const CONFIRM_PHRASE: &str = "CONFIRM";

/// Whether `typed` confirms a destructive action. Surrounding whitespace
/// is ignored; case is not.
pub fn confirmed(typed: Option<&str>) -> bool {
    typed.map(str::trim) == Some(CONFIRM_PHRASE)
}

/// Validate an upload file and return its batch objects.
///
/// The file name must end in `.json` and the document must be an object
/// with a `batches` array whose entries are objects. Nothing is sent until
/// this passes.
pub fn parse_upload(file_name: &str, text: &str) -> Result<Vec<Value>, DeskError> {
    if !file_name.to_ascii_lowercase().ends_with(".json") {
        return Err(DeskError::Validation(format!(
            "'{}' is not a JSON file, select a .json file",
            file_name
        )));
    }

    let doc: Value = serde_json::from_str(text)
        .map_err(|e| DeskError::Validation(format!("invalid JSON in '{}': {}", file_name, e)))?;

    let batches = match doc.get("batches") {
        Some(Value::Array(items)) => items,
        Some(_) => {
            return Err(DeskError::Validation("'batches' must be an array".into()));
        }
        None => {
            return Err(DeskError::Validation(
                "file must contain a 'batches' array".into(),
            ));
        }
    };

    if let Some(pos) = batches.iter().position(|b| !b.is_object()) {
        return Err(DeskError::Validation(format!(
            "entry {} in 'batches' is not an object",
            pos
        )));
    }

    Ok(batches.clone())
}
