use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CustomerId(pub Uuid);

/// A chat-platform customer. `sender_id` is the platform's stable id for the
/// person; `display_name` is whatever the platform exposes, often empty.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    pub sender_id: String,
    pub display_name: String,
}
