//! Request-scoped caller identity

use serde::{Deserialize, Serialize};

/// The authenticated caller of a request
///
/// Built by the request layer and passed by reference into every operation
/// that acts on behalf of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserContext {
    pub user_id: u64,
}

impl UserContext {
    pub fn new(user_id: u64) -> Self {
        Self { user_id }
    }
}
