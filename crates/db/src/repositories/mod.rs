use async_trait::async_trait;
use thiserror::Error;

use delguur_core::domain::conversation::{Conversation, ConversationId};
use delguur_core::domain::customer::{Customer, CustomerId};
use delguur_core::domain::order::{Order, OrderId};
use delguur_core::domain::product::{Product, ProductId};

pub mod conversation;
pub mod customer;
pub mod event;
pub mod memory;
pub mod order;
pub mod product;

pub use conversation::SqlConversationRepository;
pub use customer::SqlCustomerRepository;
pub use event::SqlProcessedEventRepository;
pub use memory::{
    InMemoryConversationRepository, InMemoryCustomerRepository, InMemoryOrderRepository,
    InMemoryProcessedEventRepository, InMemoryProductRepository,
};
pub use order::SqlOrderRepository;
pub use product::SqlProductRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("version conflict saving conversation {thread_id} at version {expected}")]
    VersionConflict { thread_id: String, expected: i64 },
    #[error("an order already exists for conversation {0}")]
    DuplicateOrder(String),
}

#[async_trait]
pub trait CustomerRepository: Send + Sync {
    async fn find_by_sender_id(&self, sender_id: &str)
        -> Result<Option<Customer>, RepositoryError>;
    async fn find_by_id(&self, id: &CustomerId) -> Result<Option<Customer>, RepositoryError>;
    async fn save(&self, customer: Customer) -> Result<(), RepositoryError>;
}

/// Conversation saves use optimistic concurrency: the stored `version` must
/// match the one the caller loaded, and a successful save returns the
/// conversation with its version bumped.
#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn find_by_id(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, RepositoryError>;
    async fn find_by_thread_id(
        &self,
        thread_id: &str,
    ) -> Result<Option<Conversation>, RepositoryError>;
    async fn save(&self, conversation: Conversation) -> Result<Conversation, RepositoryError>;
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn find_by_id(&self, id: &OrderId) -> Result<Option<Order>, RepositoryError>;
    /// At most one order exists per conversation; the schema enforces it.
    async fn find_by_conversation_id(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<Order>, RepositoryError>;
    async fn insert(&self, order: Order) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ProductRepository: Send + Sync {
    async fn find_by_id(&self, id: &ProductId) -> Result<Option<Product>, RepositoryError>;
    async fn list_active(&self) -> Result<Vec<Product>, RepositoryError>;
    async fn save(&self, product: Product) -> Result<(), RepositoryError>;
}

/// Delivery-id dedup ledger. Events are marked only after their turn
/// completed, so `is_processed` means fully processed, not merely seen.
/// `mark_processed` returns false when the id was already recorded.
#[async_trait]
pub trait ProcessedEventRepository: Send + Sync {
    async fn is_processed(&self, event_id: &str) -> Result<bool, RepositoryError>;
    async fn mark_processed(&self, event_id: &str) -> Result<bool, RepositoryError>;
}
