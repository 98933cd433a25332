use std::collections::{HashMap, HashSet};

use tokio::sync::RwLock;

use delguur_core::domain::conversation::{Conversation, ConversationId};
use delguur_core::domain::customer::{Customer, CustomerId};
use delguur_core::domain::order::{Order, OrderId};
use delguur_core::domain::product::{Product, ProductId};

use super::{
    ConversationRepository, CustomerRepository, OrderRepository, ProcessedEventRepository,
    ProductRepository, RepositoryError,
};

#[derive(Default)]
pub struct InMemoryCustomerRepository {
    customers: RwLock<HashMap<String, Customer>>,
}

#[async_trait::async_trait]
impl CustomerRepository for InMemoryCustomerRepository {
    async fn find_by_sender_id(
        &self,
        sender_id: &str,
    ) -> Result<Option<Customer>, RepositoryError> {
        let customers = self.customers.read().await;
        Ok(customers.get(sender_id).cloned())
    }

    async fn find_by_id(&self, id: &CustomerId) -> Result<Option<Customer>, RepositoryError> {
        let customers = self.customers.read().await;
        Ok(customers.values().find(|customer| &customer.id == id).cloned())
    }

    async fn save(&self, customer: Customer) -> Result<(), RepositoryError> {
        let mut customers = self.customers.write().await;
        match customers.get_mut(&customer.sender_id) {
            Some(existing) => existing.display_name = customer.display_name,
            None => {
                customers.insert(customer.sender_id.clone(), customer);
            }
        }
        Ok(())
    }
}

/// Keyed by thread id and enforcing the same optimistic version check as
/// the SQL repository, so pipeline tests exercise conflict handling.
#[derive(Default)]
pub struct InMemoryConversationRepository {
    conversations: RwLock<HashMap<String, Conversation>>,
}

#[async_trait::async_trait]
impl ConversationRepository for InMemoryConversationRepository {
    async fn find_by_id(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let conversations = self.conversations.read().await;
        Ok(conversations.values().find(|conversation| &conversation.id == id).cloned())
    }

    async fn find_by_thread_id(
        &self,
        thread_id: &str,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let conversations = self.conversations.read().await;
        Ok(conversations.get(thread_id).cloned())
    }

    async fn save(&self, conversation: Conversation) -> Result<Conversation, RepositoryError> {
        let mut conversations = self.conversations.write().await;
        let stored_version =
            conversations.get(&conversation.thread_id).map(|stored| stored.version).unwrap_or(0);
        if stored_version != conversation.version {
            return Err(RepositoryError::VersionConflict {
                thread_id: conversation.thread_id.clone(),
                expected: conversation.version,
            });
        }

        let mut saved = conversation;
        saved.version += 1;
        conversations.insert(saved.thread_id.clone(), saved.clone());
        Ok(saved)
    }
}

#[derive(Default)]
pub struct InMemoryOrderRepository {
    orders: RwLock<Vec<Order>>,
}

#[async_trait::async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn find_by_id(&self, id: &OrderId) -> Result<Option<Order>, RepositoryError> {
        let orders = self.orders.read().await;
        Ok(orders.iter().find(|order| &order.id == id).cloned())
    }

    async fn find_by_conversation_id(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<Order>, RepositoryError> {
        let orders = self.orders.read().await;
        Ok(orders.iter().find(|order| &order.conversation_id == conversation_id).cloned())
    }

    async fn insert(&self, order: Order) -> Result<(), RepositoryError> {
        let mut orders = self.orders.write().await;
        if orders.iter().any(|existing| existing.conversation_id == order.conversation_id) {
            return Err(RepositoryError::DuplicateOrder(order.conversation_id.0.to_string()));
        }
        orders.push(order);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryProductRepository {
    products: RwLock<HashMap<String, Product>>,
}

impl InMemoryProductRepository {
    pub async fn seed(&self, products: Vec<Product>) {
        let mut stored = self.products.write().await;
        for product in products {
            stored.insert(product.id.0.clone(), product);
        }
    }
}

#[async_trait::async_trait]
impl ProductRepository for InMemoryProductRepository {
    async fn find_by_id(&self, id: &ProductId) -> Result<Option<Product>, RepositoryError> {
        let products = self.products.read().await;
        Ok(products.get(&id.0).cloned())
    }

    async fn list_active(&self) -> Result<Vec<Product>, RepositoryError> {
        let products = self.products.read().await;
        let mut active: Vec<Product> =
            products.values().filter(|product| product.active).cloned().collect();
        active.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(active)
    }

    async fn save(&self, product: Product) -> Result<(), RepositoryError> {
        let mut products = self.products.write().await;
        products.insert(product.id.0.clone(), product);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryProcessedEventRepository {
    seen: RwLock<HashSet<String>>,
}

#[async_trait::async_trait]
impl ProcessedEventRepository for InMemoryProcessedEventRepository {
    async fn is_processed(&self, event_id: &str) -> Result<bool, RepositoryError> {
        let seen = self.seen.read().await;
        Ok(seen.contains(event_id))
    }

    async fn mark_processed(&self, event_id: &str) -> Result<bool, RepositoryError> {
        let mut seen = self.seen.write().await;
        Ok(seen.insert(event_id.to_string()))
    }
}
