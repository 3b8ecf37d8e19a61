use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use super::backend::HttpResponse;
use super::ApiError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// The `{meta, data}` wrapper every endpoint replies with.
/// Login replies put `message` at the top level instead of under `meta`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub meta: Option<Meta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
}

/// A successful reply.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub envelope: Envelope,
}

impl ApiResponse {
    /// Turn a raw exchange into a success payload or a classified error.
    pub fn from_http(response: HttpResponse) -> Result<Self, ApiError> {
        if !response.is_success() {
            return Err(ApiError::from_status(response.status, &response.body));
        }

        // 204 No Content
        if response.body.trim().is_empty() {
            return Ok(Self {
                status: response.status,
                envelope: Envelope::default(),
            });
        }

        let envelope: Envelope = serde_json::from_str(&response.body).map_err(|e| {
            ApiError::SystemError {
                status: Some(response.status),
                message: format!("Invalid response body: {}", e),
            }
        })?;

        Ok(Self {
            status: response.status,
            envelope,
        })
    }

    pub fn message(&self) -> Option<&str> {
        self.envelope
            .meta
            .as_ref()
            .and_then(|m| m.message.as_deref())
            .or(self.envelope.message.as_deref())
    }

    /// Decode `data` into a typed record; shape mismatches are validation errors.
    pub fn data<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        let value = self
            .envelope
            .data
            .clone()
            .ok_or_else(|| ApiError::validation("Response did not include data"))?;
        serde_json::from_value(value)
            .map_err(|e| ApiError::validation(format!("Unexpected response shape: {}", e)))
    }
}
