use std::collections::BTreeMap;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use super::ApiError;

const AUTHORIZATION: &str = "authorization";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

/// A request described as plain data so it can be dispatched again later.
///
/// Header names are stored lowercase. Replaying a request only swaps its
/// `authorization` header; the body is never rebuilt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestSpec {
    pub method: Method,
    pub path: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl RequestSpec {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Post, path).with_body(body)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Copy of this request carrying `Bearer <token>`, replacing any
    /// existing authorization header.
    pub fn with_bearer(&self, token: &str) -> Self {
        self.clone()
            .with_header(AUTHORIZATION, format!("Bearer {}", token))
    }

    pub fn has_authorization(&self) -> bool {
        self.headers.contains_key(AUTHORIZATION)
    }
}

/// A successful response. Bodies are JSON; an empty body is `Value::Null`.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub body: Value,
}

impl Response {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    pub fn ok(body: Value) -> Self {
        Self::new(200, body)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        T::deserialize(&self.body).map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_with_bearer_replaces_header_and_keeps_body() {
        let original = RequestSpec::post("/items", json!({"name": "tent"}))
            .with_header("Authorization", "Bearer A1")
            .with_header("X-Trace", "abc");

        let replay = original.with_bearer("A2");

        assert_eq!(replay.header("authorization"), Some("Bearer A2"));
        assert_eq!(replay.header("x-trace"), Some("abc"));
        assert_eq!(replay.body, original.body);
        // The original is untouched
        assert_eq!(original.header("Authorization"), Some("Bearer A1"));
    }

    #[test]
    fn test_spec_serializes_for_redispatch() {
        let spec = RequestSpec::post("/items", json!({"n": 1})).with_bearer("A1");
        let text = serde_json::to_string(&spec).unwrap();
        let back: RequestSpec = serde_json::from_str(&text).unwrap();
        assert_eq!(back, spec);
        assert!(text.contains("\"POST\""));
    }

    #[test]
    fn test_response_json() {
        #[derive(Deserialize)]
        struct Item {
            name: String,
        }
        let response = Response::ok(json!({"name": "tent"}));
        let item: Item = response.json().unwrap();
        assert_eq!(item.name, "tent");

        let bad: Result<Item, _> = Response::ok(json!([1, 2])).json();
        assert!(matches!(bad, Err(ApiError::InvalidResponse(_))));
    }
}
