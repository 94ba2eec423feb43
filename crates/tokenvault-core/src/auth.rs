use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Logical keys consumed by the identity/session layer.
pub mod keys {
    pub const ACCESS_TOKEN: &str = "auth.access_token";
    pub const REFRESH_TOKEN: &str = "auth.refresh_token";
    pub const SESSION: &str = "auth.session";
    pub const USER: &str = "auth.user";

    /// All auth keys, in the order they are written.
    pub const ALL: [&str; 4] = [ACCESS_TOKEN, REFRESH_TOKEN, SESSION, USER];

    /// Keys whose values are JSON objects rather than raw strings.
    pub fn is_object_key(key: &str) -> bool {
        key == SESSION || key == USER
    }
}

/// Allow-listed projection of the identity provider's user object.
///
/// Fields are copied as the provider sent them; anything not listed here is dropped.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EssentialUserData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_metadata: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_metadata: Option<Value>,
}

/// Allow-listed projection of the provider session: expiry information only.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EssentialSessionData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<Value>,
}

impl EssentialUserData {
    /// Pick the allow-listed fields out of a provider user payload. Never fails: a payload
    /// that is not an object projects to an empty record.
    pub fn from_provider(user: &Value) -> Self {
        Self {
            id: pick(user, "id"),
            email: pick(user, "email"),
            role: pick(user, "role"),
            app_metadata: pick(user, "app_metadata"),
            user_metadata: pick(user, "user_metadata"),
        }
    }
}

impl EssentialSessionData {
    /// Pick the allow-listed fields out of a provider session payload.
    pub fn from_provider(session: &Value) -> Self {
        Self {
            expires_at: pick(session, "expires_at"),
            expires_in: pick(session, "expires_in"),
            token_type: pick(session, "token_type"),
        }
    }
}

fn pick(source: &Value, field: &str) -> Option<Value> {
    source.get(field).cloned()
}
