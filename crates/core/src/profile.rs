//! Business profile data submitted to directories.

use serde::{Deserialize, Serialize};

use crate::id::UserId;

/// The listing a user wants to appear in directories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessProfile {
    pub user_id: UserId,
    pub business_name: String,
    pub website: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub description: Option<String>,
}

impl BusinessProfile {
    pub fn new(user_id: UserId, business_name: impl Into<String>) -> Self {
        Self {
            user_id,
            business_name: business_name.into(),
            website: None,
            email: None,
            phone: None,
            address: None,
            description: None,
        }
    }
}
