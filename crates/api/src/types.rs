use serde::{Deserialize, Serialize};

/// Standard response wrapper: `{success, message, data}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    #[serde(default = "default_success")]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    pub data: Option<T>,
}

fn default_success() -> bool {
    true
}

/// `POST /device` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDevice {
    pub address: String,
    pub name: String,
    pub hub_address: String,
}

/// `PUT /device/:address` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenameDevice {
    pub name: String,
}

/// `PUT /device/:address/pet` body: either the pet's id or its public code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum PetLink {
    #[serde(rename = "petId")]
    PetId(String),
    #[serde(rename = "pet_code")]
    PetCode(String),
}
