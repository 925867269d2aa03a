//! Payload encoding.
//!
//! Documents are stored as compact JSON text in the `data` column. Any
//! `Serialize` value can be inserted as long as it serializes to a JSON
//! object; scalars, arrays and `null` are rejected as invalid documents.

use crate::error::{CoreError, CoreResult};
use crate::types::Document;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Converts a serializable value into a document.
pub fn to_document<T: Serialize + ?Sized>(value: &T) -> CoreResult<Document> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(CoreError::invalid_document(format!(
            "expected a JSON object, got {}",
            kind_name(&other)
        ))),
    }
}

/// Deserializes a document into a typed value.
pub fn from_document<T: DeserializeOwned>(document: Document) -> CoreResult<T> {
    Ok(serde_json::from_value(Value::Object(document))?)
}

pub(crate) fn encode(document: &Document) -> CoreResult<String> {
    Ok(serde_json::to_string(document)?)
}

pub(crate) fn decode(text: &str) -> CoreResult<Document> {
    match serde_json::from_str(text)? {
        Value::Object(map) => Ok(map),
        other => Err(CoreError::invalid_document(format!(
            "stored payload is {}, not an object",
            kind_name(&other)
        ))),
    }
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct User {
        name: String,
        age: u32,
    }

    #[test]
    fn structs_become_documents() {
        let doc = to_document(&User {
            name: "Alice".into(),
            age: 30,
        })
        .unwrap();
        assert_eq!(doc.get("name"), Some(&json!("Alice")));
        assert_eq!(doc.get("age"), Some(&json!(30)));

        let user: User = from_document(doc).unwrap();
        assert_eq!(user.age, 30);
    }

    #[test]
    fn non_objects_are_invalid_documents() {
        for value in [json!("string"), json!(123), json!([1, 2]), json!(null)] {
            let err = to_document(&value).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidDocument);
        }
    }

    #[test]
    fn decode_rejects_non_object_payload() {
        assert!(decode("[1,2,3]").is_err());
        assert!(decode("not json").is_err());
        assert_eq!(decode(r#"{"a":1}"#).unwrap().get("a"), Some(&json!(1)));
    }

    #[test]
    fn encode_preserves_unicode() {
        let doc = to_document(&json!({"name": "José 中文"})).unwrap();
        let text = encode(&doc).unwrap();
        assert_eq!(decode(&text).unwrap(), doc);
    }
}
