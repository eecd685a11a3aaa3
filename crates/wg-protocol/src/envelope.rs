//! HTTP error response contract shared by every admin and business route.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpErrorEnvelope {
    pub code: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
}
