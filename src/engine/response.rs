use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::ClientError;

/// A response body after content negotiation.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(Value),
    Text(String),
    Empty,
}

impl ResponseBody {
    /// Parse as JSON when the content type says so; anything else, including
    /// JSON that does not decode, is kept as lossy UTF-8 text.
    pub fn from_bytes(content_type: Option<&str>, bytes: &[u8]) -> Self {
        if bytes.is_empty() {
            return ResponseBody::Empty;
        }

        if content_type.is_some_and(is_structured) {
            if let Ok(value) = serde_json::from_slice::<Value>(bytes) {
                return ResponseBody::Json(value);
            }
        }

        ResponseBody::Text(String::from_utf8_lossy(bytes).into_owned())
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ResponseBody::Json(value) => Some(value),
            _ => None,
        }
    }
}

fn is_structured(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    essence == "application/json" || essence.ends_with("+json")
}

/// A successful (2xx) response.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: ResponseBody,
}

impl ApiResponse {
    /// Decode the JSON body into `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, ClientError> {
        let value = self.body.as_json().ok_or_else(|| {
            ClientError::InvalidResponse(format!(
                "expected a JSON body, got {}",
                match &self.body {
                    ResponseBody::Text(_) => "text",
                    _ => "nothing",
                }
            ))
        })?;

        T::deserialize(value).map_err(|e| ClientError::InvalidResponse(e.to_string()))
    }
}
