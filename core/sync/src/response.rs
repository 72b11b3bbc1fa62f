//! Paged response envelope and batched document decoding.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Continuation information of one page.
///
/// `has_next_page` decides whether another page is requested; the mere
/// presence of `end_cursor` does not.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    #[serde(default)]
    pub end_cursor: Option<String>,
    pub has_next_page: bool,
}

/// One decoded page of one entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphQLResponse<T> {
    pub nodes: Vec<T>,
    pub page_info: PageInfo,
}

impl<T: DeserializeOwned> GraphQLResponse<T> {
    /// Decode the sub-object named `alias` of a round's data object.
    ///
    /// # Errors
    /// - The alias is missing or null
    /// - The sub-object does not match `{nodes, pageInfo}` or a node does not
    ///   decode as `T`
    pub fn from_document(data: &Map<String, Value>, alias: &str) -> Result<Self, DocumentError> {
        let slice = match data.get(alias) {
            Some(Value::Null) | None => {
                return Err(DocumentError::MissingSelection(alias.to_string()));
            }
            Some(slice) => slice,
        };
        serde_json::from_value(slice.clone()).map_err(|e| DocumentError::Undecodable {
            context: alias.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Why a response body could not be used.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DocumentError {
    #[error("response body is empty")]
    Empty,

    #[error("could not decode {context}: {reason}")]
    Undecodable { context: String, reason: String },

    #[error("response has no data object")]
    MissingData,

    #[error("response has no selection for '{0}'")]
    MissingSelection(String),

    #[error("server reported errors: {}", .0.join("; "))]
    ServerErrors(Vec<String>),
}

/// Top-level shape of a batched response body.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    errors: Option<Vec<Value>>,
    #[serde(flatten)]
    rest: Map<String, Value>,
}

/// Decode a round's response body into its data object.
///
/// The data object is the value under `data` when present, otherwise the
/// top-level object itself. A non-empty top-level `errors` array fails the
/// whole document, whatever data accompanies it.
pub fn decode_document(body: &[u8]) -> Result<Map<String, Value>, DocumentError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(DocumentError::Empty);
    }

    let envelope: Envelope =
        serde_json::from_slice(body).map_err(|e| DocumentError::Undecodable {
            context: "response body".to_string(),
            reason: e.to_string(),
        })?;

    if let Some(errors) = envelope.errors.filter(|errors| !errors.is_empty()) {
        return Err(DocumentError::ServerErrors(
            errors.iter().map(error_message).collect(),
        ));
    }

    match envelope.data {
        Some(Value::Object(data)) => Ok(data),
        Some(_) => Err(DocumentError::MissingData),
        None if envelope.rest.is_empty() => Err(DocumentError::MissingData),
        None => Ok(envelope.rest),
    }
}

fn error_message(error: &Value) -> String {
    error
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Node {
        id: String,
    }

    #[test]
    fn test_decode_data_envelope() {
        let body = br#"{"data": {"things": {"nodes": [], "pageInfo": {"hasNextPage": false}}}}"#;
        let data = decode_document(body).unwrap();
        assert!(data.contains_key("things"));
    }

    #[test]
    fn test_decode_bare_document() {
        let body = br#"{"things": {"nodes": [{"id": "a"}], "pageInfo": {"endCursor": "c", "hasNextPage": true}}}"#;
        let data = decode_document(body).unwrap();
        let page = GraphQLResponse::<Node>::from_document(&data, "things").unwrap();

        assert_eq!(page.nodes, vec![Node { id: "a".to_string() }]);
        assert_eq!(page.page_info.end_cursor.as_deref(), Some("c"));
        assert!(page.page_info.has_next_page);
    }

    #[test]
    fn test_errors_array_fails_document() {
        let body = br#"{"data": {"things": null}, "errors": [{"message": "boom"}, {"code": 1}]}"#;
        match decode_document(body) {
            Err(DocumentError::ServerErrors(messages)) => {
                assert_eq!(messages[0], "boom");
                assert_eq!(messages.len(), 2);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_empty_errors_array_is_ignored() {
        let body = br#"{"data": {"things": {"nodes": [], "pageInfo": {"hasNextPage": false}}}, "errors": []}"#;
        assert!(decode_document(body).is_ok());
    }

    #[test]
    fn test_malformed_bodies() {
        assert_eq!(decode_document(b""), Err(DocumentError::Empty));
        assert_eq!(decode_document(b"  \n"), Err(DocumentError::Empty));
        assert!(matches!(
            decode_document(b"{not json"),
            Err(DocumentError::Undecodable { .. })
        ));
        assert_eq!(decode_document(b"{}"), Err(DocumentError::MissingData));
        assert_eq!(
            decode_document(br#"{"data": null}"#),
            Err(DocumentError::MissingData)
        );
    }

    #[test]
    fn test_missing_or_bad_selection() {
        let data = json!({"things": {"nodes": "nope"}}).as_object().cloned().unwrap();
        assert!(matches!(
            GraphQLResponse::<Node>::from_document(&data, "things"),
            Err(DocumentError::Undecodable { .. })
        ));
        assert_eq!(
            GraphQLResponse::<Node>::from_document(&data, "others"),
            Err(DocumentError::MissingSelection("others".to_string()))
        );
    }
}
