//! Operator accounts

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Role, UserId};

/// An operator account (the password hash never leaves the backend)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

/// Input for creating an operator account
#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub password: String,
    pub role: Role,
}
