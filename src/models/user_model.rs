//! models/user_model.rs

use serde::Serialize;

/// What the delivery pipeline needs to know about a user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserRecord {
    pub id: String,
    pub email: String,
    /// Google refresh token allowing mail to be sent on the user's behalf.
    #[serde(skip_serializing)]
    pub delegation_credential: Option<String>,
}
