//! Base64 data URIs, the transport format for images.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DataUriError {
    #[error("data URI must start with 'data:'")]
    MissingScheme,

    #[error("data URI has no ',' between header and payload")]
    MissingSeparator,

    #[error("data URI payload must be base64 encoded")]
    NotBase64Encoded,

    #[error("data URI payload is empty")]
    EmptyPayload,

    #[error("data URI payload is not valid base64: {0}")]
    InvalidBase64(String),
}

/// A parsed `data:<mime>;base64,<payload>` string with a validated payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DataUri {
    mime_type: String,
    data: String,
}

impl DataUri {
    /// MIME type assumed when the header omits one.
    pub const DEFAULT_MIME_TYPE: &'static str = "image/png";

    pub fn parse(input: &str) -> Result<Self, DataUriError> {
        let rest = input
            .trim()
            .strip_prefix("data:")
            .ok_or(DataUriError::MissingScheme)?;
        let (header, payload) = rest
            .split_once(',')
            .ok_or(DataUriError::MissingSeparator)?;

        let mut params = header.split(';');
        let mime_type = params.next().unwrap_or_default().trim();
        if !params.any(|p| p.trim().eq_ignore_ascii_case("base64")) {
            return Err(DataUriError::NotBase64Encoded);
        }

        let mime_type = if mime_type.is_empty() {
            Self::DEFAULT_MIME_TYPE
        } else {
            mime_type
        };

        Self::from_base64(mime_type, payload)
    }

    /// Wrap an already base64-encoded payload.
    pub fn from_base64(
        mime_type: impl Into<String>,
        data: impl Into<String>,
    ) -> Result<Self, DataUriError> {
        let data = data.into();
        if data.is_empty() {
            return Err(DataUriError::EmptyPayload);
        }
        STANDARD
            .decode(data.as_bytes())
            .map_err(|e| DataUriError::InvalidBase64(e.to_string()))?;

        Ok(Self {
            mime_type: mime_type.into(),
            data,
        })
    }

    pub fn png(data: impl Into<String>) -> Result<Self, DataUriError> {
        Self::from_base64(Self::DEFAULT_MIME_TYPE, data)
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// The raw base64 payload, without the header.
    pub fn data(&self) -> &str {
        &self.data
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }
}

impl fmt::Display for DataUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "data:{};base64,{}", self.mime_type, self.data)
    }
}

impl FromStr for DataUri {
    type Err = DataUriError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for DataUri {
    type Error = DataUriError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<DataUri> for String {
    fn from(value: DataUri) -> Self {
        value.to_string()
    }
}
