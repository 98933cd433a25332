pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod extraction;
pub mod flows;
pub mod phone;
pub mod readiness;

pub use domain::conversation::{
    Conversation, ConversationId, ConversationStatus, Intent, Sender, Turn,
};
pub use domain::customer::{Customer, CustomerId};
pub use domain::order::{Order, OrderId, OrderLine, OrderStatus, Provenance};
pub use domain::product::{Product, ProductId};
pub use errors::{ApplicationError, DomainError};
pub use extraction::{ExtractedData, ExtractedItem, Extraction};
pub use readiness::{assemble_order, evaluate_readiness, ReadinessDecision, CONFIDENCE_THRESHOLD};
