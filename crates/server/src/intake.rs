//! Per-message intake pipeline: dedup, classification, the readiness gate
//! and order persistence. `process_event` never returns an error; every
//! failure degrades to a logged apology so the webhook boundary stays quiet.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use uuid::Uuid;

use delguur_agent::{Classifier, LlmClient, ReplyContext, ReplyGenerator, APOLOGY_REPLY};
use delguur_chat::{InboundMessage, MessageSender};
use delguur_core::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use delguur_core::domain::conversation::{Conversation, ConversationStatus, Intent, Sender};
use delguur_core::domain::customer::{Customer, CustomerId};
use delguur_core::domain::order::Order;
use delguur_core::errors::ApplicationError;
use delguur_core::extraction::Extraction;
use delguur_core::flows::{FlowEngine, IntakeAction, IntakeContext, IntakeState, OrderIntakeFlow};
use delguur_core::readiness::{assemble_order, evaluate_readiness, ReadinessDecision};
use delguur_db::repositories::{
    ConversationRepository, CustomerRepository, OrderRepository, ProcessedEventRepository,
    ProductRepository, RepositoryError,
};

use crate::sheets::SheetMirror;

fn persistence(error: RepositoryError) -> ApplicationError {
    ApplicationError::Persistence(error.to_string())
}

/// Forwards flow audit events into the log stream.
#[derive(Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        tracing::info!(
            event_name = %event.event_type,
            category = ?event.category,
            outcome = ?event.outcome,
            correlation_id = %event.correlation_id,
            conversation_id = ?event.conversation_id,
            order_id = ?event.order_id,
            "audit event"
        );
    }
}

pub struct IntakeDependencies {
    pub customers: Arc<dyn CustomerRepository>,
    pub conversations: Arc<dyn ConversationRepository>,
    pub orders: Arc<dyn OrderRepository>,
    pub products: Arc<dyn ProductRepository>,
    pub processed_events: Arc<dyn ProcessedEventRepository>,
    pub llm: Arc<dyn LlmClient>,
    pub replies: Arc<dyn ReplyGenerator>,
    pub sender: Arc<dyn MessageSender>,
    pub mirror: Arc<dyn SheetMirror>,
    pub audit: Arc<dyn AuditSink>,
}

pub struct IntakePipeline {
    customers: Arc<dyn CustomerRepository>,
    conversations: Arc<dyn ConversationRepository>,
    orders: Arc<dyn OrderRepository>,
    products: Arc<dyn ProductRepository>,
    processed_events: Arc<dyn ProcessedEventRepository>,
    classifier: Classifier<Arc<dyn LlmClient>>,
    replies: Arc<dyn ReplyGenerator>,
    sender: Arc<dyn MessageSender>,
    mirror: Arc<dyn SheetMirror>,
    audit: Arc<dyn AuditSink>,
    flow: FlowEngine<OrderIntakeFlow>,
    // One lock per thread id so turns in the same conversation serialize.
    thread_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl IntakePipeline {
    pub fn new(deps: IntakeDependencies) -> Self {
        Self {
            customers: deps.customers,
            conversations: deps.conversations,
            orders: deps.orders,
            products: deps.products,
            processed_events: deps.processed_events,
            classifier: Classifier::new(deps.llm),
            replies: deps.replies,
            sender: deps.sender,
            mirror: deps.mirror,
            audit: deps.audit,
            flow: FlowEngine::default(),
            thread_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Handles one inbound message end to end. Infallible at the boundary:
    /// any internal failure is logged and answered with a fixed apology.
    pub async fn process_event(&self, message: &InboundMessage) {
        let correlation_id =
            message.event_id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());

        if let Some(event_id) = message.event_id.as_deref() {
            match self.processed_events.is_processed(event_id).await {
                Ok(true) => {
                    tracing::info!(
                        event_name = "intake.duplicate_delivery",
                        event_id,
                        "skipping redelivered event"
                    );
                    return;
                }
                Ok(false) => {}
                Err(error) => {
                    // The conversation status gate still blocks a second
                    // order, so a broken ledger must not drop the message.
                    tracing::warn!(
                        event_name = "intake.dedup_unavailable",
                        correlation_id,
                        error = %error,
                        "processed-event ledger unavailable"
                    );
                }
            }
        }

        let lock = self.thread_lock(&message.thread_id).await;
        let _guard = lock.lock().await;

        match self.handle_locked(message, &correlation_id).await {
            Ok(()) => {
                // Recorded only once the turn fully succeeded, so a
                // redelivery can retry a failed one.
                if let Some(event_id) = message.event_id.as_deref() {
                    if let Err(error) = self.processed_events.mark_processed(event_id).await {
                        tracing::warn!(
                            event_name = "intake.dedup_unavailable",
                            correlation_id,
                            error = %error,
                            "could not record the processed event"
                        );
                    }
                }
            }
            Err(error) => {
                tracing::error!(
                    event_name = "intake.turn_failed",
                    correlation_id,
                    thread_id = %message.thread_id,
                    error = %error,
                    "turn processing failed"
                );
                self.send_best_effort(&message.sender_id, APOLOGY_REPLY, &correlation_id).await;
            }
        }
    }

    async fn thread_lock(&self, thread_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.thread_locks.lock().await;
        // An entry only the map still references belongs to a finished
        // turn, so the map stays bounded by in-flight conversations.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(locks.entry(thread_id.to_string()).or_default())
    }

    async fn handle_locked(
        &self,
        message: &InboundMessage,
        correlation_id: &str,
    ) -> Result<(), ApplicationError> {
        let customer = self.find_or_create_customer(message).await?;

        let found =
            self.conversations.find_by_thread_id(&message.thread_id).await.map_err(persistence)?;
        let mut conversation = match found {
            Some(conversation) => conversation,
            None => Conversation::new(&message.thread_id, customer.id.clone()),
        };

        let history = conversation.turns.clone();
        conversation.push_turn(Sender::Customer, &message.text);

        if conversation.is_terminal() {
            return self.answer_closed_conversation(conversation, message, correlation_id).await;
        }

        let catalog = match self.products.list_active().await {
            Ok(catalog) => catalog,
            Err(error) => {
                tracing::warn!(
                    event_name = "intake.catalog_unavailable",
                    correlation_id,
                    error = %error,
                    "classifying without the product catalog"
                );
                Vec::new()
            }
        };

        let extraction = self.classifier.classify(&message.text, &history, &catalog).await;
        let decision = evaluate_readiness(&extraction);

        let audit_context = AuditContext::new(
            Some(conversation.id.clone()),
            Some(message.sender_id.clone()),
            correlation_id,
            "intake-pipeline",
        );

        let flow_context = IntakeContext {
            missing_fields: match &decision {
                ReadinessDecision::Incomplete { missing_fields } => missing_fields.clone(),
                _ => Vec::new(),
            },
        };

        let outcome = match self.flow.apply_with_audit(
            &IntakeState::from(conversation.status),
            &decision.event(),
            &flow_context,
            self.audit.as_ref(),
            &audit_context,
        ) {
            Ok(outcome) => outcome,
            Err(error) => {
                tracing::warn!(
                    event_name = "intake.transition_rejected",
                    correlation_id,
                    error = %error,
                    "gate refused the event; answering without state change"
                );
                return self
                    .finish_turn(
                        conversation,
                        &extraction,
                        &ReadinessDecision::NonOrdering,
                        None,
                        message,
                        correlation_id,
                    )
                    .await;
            }
        };

        // Unrecognized intents read as browsing on the conversation record.
        conversation.current_intent = match extraction.intent {
            Intent::Other => Intent::Browsing,
            intent => intent,
        };
        conversation.last_extraction = Some(extraction.clone());

        let mut created_order: Option<Order> = None;
        if outcome.actions.contains(&IntakeAction::PersistOrder) {
            // Persist the conversation shell first so the order row has its
            // foreign-key target, then the order, then the terminal status.
            // The unique conversation constraint on orders keeps a replay of
            // any later failure from ever creating a second order.
            conversation = self.conversations.save(conversation).await.map_err(persistence)?;

            let order = assemble_order(&conversation, &extraction, &catalog, &message.text);
            self.orders.insert(order.clone()).await.map_err(persistence)?;

            self.audit.emit(
                AuditEvent::new(
                    Some(conversation.id.clone()),
                    Some(message.sender_id.clone()),
                    correlation_id,
                    "intake.order_persisted",
                    AuditCategory::Persistence,
                    "intake-pipeline",
                    AuditOutcome::Success,
                )
                .with_order(order.id.clone())
                .with_metadata("total", order.total.to_string())
                .with_metadata("needs_review", order.needs_review.to_string()),
            );

            let mirror = Arc::clone(&self.mirror);
            let snapshot = order.clone();
            tokio::spawn(async move {
                if let Err(error) = mirror.append_order(&snapshot).await {
                    tracing::warn!(
                        event_name = "sheets.append_failed",
                        order_id = %snapshot.id.0,
                        error = %error,
                        "order mirror append failed"
                    );
                }
            });

            created_order = Some(order);
        }

        let next_status = ConversationStatus::from(outcome.to);
        if conversation.status != next_status {
            conversation.transition_to(next_status).map_err(ApplicationError::Domain)?;
        }

        self.finish_turn(
            conversation,
            &extraction,
            &decision,
            created_order.as_ref(),
            message,
            correlation_id,
        )
        .await
    }

    /// Generates the reply, records the bot turn, saves and sends. Send
    /// failures are logged, not propagated; the turn already succeeded.
    async fn finish_turn(
        &self,
        mut conversation: Conversation,
        extraction: &Extraction,
        decision: &ReadinessDecision,
        order: Option<&Order>,
        message: &InboundMessage,
        correlation_id: &str,
    ) -> Result<(), ApplicationError> {
        let reply = self
            .replies
            .reply(ReplyContext { conversation: &conversation, extraction, decision, order })
            .await;

        conversation.push_turn(Sender::Bot, &reply);
        self.conversations.save(conversation).await.map_err(persistence)?;

        self.send_best_effort(&message.sender_id, &reply, correlation_id).await;
        Ok(())
    }

    /// A closed conversation still gets an answer, but its message never
    /// re-enters the gate: no classification, no state change, no order.
    async fn answer_closed_conversation(
        &self,
        conversation: Conversation,
        message: &InboundMessage,
        correlation_id: &str,
    ) -> Result<(), ApplicationError> {
        tracing::info!(
            event_name = "intake.closed_conversation_turn",
            correlation_id,
            thread_id = %message.thread_id,
            "message on a closed conversation answered without intake"
        );

        let extraction =
            conversation.last_extraction.clone().unwrap_or_else(Extraction::fallback);
        self.finish_turn(
            conversation,
            &extraction,
            &ReadinessDecision::NonOrdering,
            None,
            message,
            correlation_id,
        )
        .await
    }

    async fn find_or_create_customer(
        &self,
        message: &InboundMessage,
    ) -> Result<Customer, ApplicationError> {
        let existing =
            self.customers.find_by_sender_id(&message.sender_id).await.map_err(persistence)?;
        if let Some(existing) = existing {
            return Ok(existing);
        }

        let customer = Customer {
            id: CustomerId(Uuid::new_v4()),
            sender_id: message.sender_id.clone(),
            display_name: message.sender_id.clone(),
        };
        self.customers.save(customer.clone()).await.map_err(persistence)?;
        Ok(customer)
    }

    async fn send_best_effort(&self, recipient_id: &str, text: &str, correlation_id: &str) {
        if let Err(error) = self.sender.send_text(recipient_id, text).await {
            tracing::warn!(
                event_name = "intake.reply_send_failed",
                correlation_id,
                recipient_id,
                error = %error,
                "reply delivery failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use rust_decimal::Decimal;

    use std::sync::atomic::{AtomicU32, Ordering};

    use delguur_agent::{LlmClient, ScriptedLlmClient, TemplateReplyGenerator, APOLOGY_REPLY};
    use delguur_chat::{InboundMessage, MessageSender, RecordingMessageSender};
    use delguur_core::audit::InMemoryAuditSink;
    use delguur_core::domain::conversation::{
        Conversation, ConversationId, ConversationStatus, Intent,
    };
    use delguur_core::domain::product::{Product, ProductId};
    use delguur_db::repositories::{
        ConversationRepository, InMemoryConversationRepository, InMemoryCustomerRepository,
        InMemoryOrderRepository, InMemoryProcessedEventRepository, InMemoryProductRepository,
        OrderRepository, RepositoryError,
    };

    use crate::sheets::{RecordingSheetMirror, SheetMirror};

    use super::{IntakeDependencies, IntakePipeline};

    const READY_REPLY: &str = r#"{
        "intent": "ordering",
        "data": {
            "items": [{"name": "хар цамц", "quantity": 2}],
            "phone": "99112233",
            "full_address": "БЗД 14-р хороо"
        },
        "isOrderReady": true,
        "confidence": 0.92,
        "missingFields": []
    }"#;

    const INCOMPLETE_REPLY: &str = r#"{
        "intent": "ordering",
        "data": {"items": [{"name": "хар цамц", "quantity": 2}], "phone": null, "full_address": null},
        "isOrderReady": false,
        "confidence": 0.8,
        "missingFields": ["phone", "address"]
    }"#;

    const INQUIRY_REPLY: &str = r#"{
        "intent": "inquiry",
        "data": {"items": [], "phone": null, "full_address": null},
        "isOrderReady": false,
        "confidence": 0.85,
        "missingFields": []
    }"#;

    /// Delegates to the in-memory repository but fails a scripted number of
    /// saves first, to exercise mid-turn persistence outages.
    #[derive(Default)]
    struct FlakyConversationRepository {
        inner: InMemoryConversationRepository,
        failing_saves: AtomicU32,
    }

    impl FlakyConversationRepository {
        fn fail_next_saves(&self, count: u32) {
            self.failing_saves.store(count, Ordering::SeqCst);
        }
    }

    #[async_trait::async_trait]
    impl ConversationRepository for FlakyConversationRepository {
        async fn find_by_id(
            &self,
            id: &ConversationId,
        ) -> Result<Option<Conversation>, RepositoryError> {
            self.inner.find_by_id(id).await
        }

        async fn find_by_thread_id(
            &self,
            thread_id: &str,
        ) -> Result<Option<Conversation>, RepositoryError> {
            self.inner.find_by_thread_id(thread_id).await
        }

        async fn save(&self, conversation: Conversation) -> Result<Conversation, RepositoryError> {
            if self.failing_saves.load(Ordering::SeqCst) > 0 {
                self.failing_saves.fetch_sub(1, Ordering::SeqCst);
                return Err(RepositoryError::VersionConflict {
                    thread_id: conversation.thread_id.clone(),
                    expected: conversation.version,
                });
            }
            self.inner.save(conversation).await
        }
    }

    struct Harness {
        pipeline: IntakePipeline,
        conversations: Arc<InMemoryConversationRepository>,
        orders: Arc<InMemoryOrderRepository>,
        sender: Arc<RecordingMessageSender>,
        mirror: Arc<RecordingSheetMirror>,
        llm: Arc<ScriptedLlmClient>,
    }

    async fn harness() -> Harness {
        let products = Arc::new(InMemoryProductRepository::default());
        products
            .seed(vec![Product {
                id: ProductId("tshirt-black".to_string()),
                name: "хар цамц".to_string(),
                price: Decimal::new(15_000, 0),
                stock: 20,
                active: true,
            }])
            .await;

        let conversations = Arc::new(InMemoryConversationRepository::default());
        let orders = Arc::new(InMemoryOrderRepository::default());
        let sender = Arc::new(RecordingMessageSender::default());
        let mirror = Arc::new(RecordingSheetMirror::default());
        let llm = Arc::new(ScriptedLlmClient::default());

        let pipeline = IntakePipeline::new(IntakeDependencies {
            customers: Arc::new(InMemoryCustomerRepository::default()),
            conversations: Arc::clone(&conversations) as Arc<dyn ConversationRepository>,
            orders: Arc::clone(&orders) as Arc<dyn OrderRepository>,
            products,
            processed_events: Arc::new(InMemoryProcessedEventRepository::default()),
            llm: Arc::clone(&llm) as Arc<dyn LlmClient>,
            replies: Arc::new(TemplateReplyGenerator),
            sender: Arc::clone(&sender) as Arc<dyn MessageSender>,
            mirror: Arc::clone(&mirror) as Arc<dyn SheetMirror>,
            audit: Arc::new(InMemoryAuditSink::default()),
        });

        Harness { pipeline, conversations, orders, sender, mirror, llm }
    }

    fn message(event_id: &str, text: &str) -> InboundMessage {
        InboundMessage {
            event_id: Some(event_id.to_string()),
            sender_id: "psid-100".to_string(),
            thread_id: "psid-100".to_string(),
            text: text.to_string(),
            timestamp_ms: Some(1_700_000_000_000),
        }
    }

    async fn settle() {
        // Lets the spawned mirror task run to completion.
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn ready_message_creates_priced_order_and_confirms() {
        let harness = harness().await;
        harness.llm.push_reply(READY_REPLY);

        harness
            .pipeline
            .process_event(&message("mid.1", "2 ширхэг хар цамц авъя. Утас: 99112233. БЗД 14-р хороо"))
            .await;
        settle().await;

        let conversation = harness
            .conversations
            .find_by_thread_id("psid-100")
            .await
            .expect("lookup")
            .expect("conversation exists");
        assert_eq!(conversation.status, ConversationStatus::OrderCreated);

        let order = harness
            .orders
            .find_by_conversation_id(&conversation.id)
            .await
            .expect("lookup")
            .expect("order exists");
        assert_eq!(order.total, Decimal::new(30_000, 0));
        assert_eq!(order.phone, "99112233");
        assert!(!order.needs_review);

        let sent = harness.sender.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.contains("30000"));

        assert_eq!(harness.mirror.rows().len(), 1);
    }

    #[tokio::test]
    async fn redelivered_event_id_is_handled_once() {
        let harness = harness().await;
        harness.llm.push_reply(READY_REPLY);

        let delivery = message("mid.7", "2 ширхэг хар цамц авъя. Утас: 99112233. БЗД 14-р хороо");
        harness.pipeline.process_event(&delivery).await;
        harness.pipeline.process_event(&delivery).await;
        settle().await;

        assert_eq!(harness.sender.sent().len(), 1);
        assert_eq!(harness.mirror.rows().len(), 1);
    }

    #[tokio::test]
    async fn closed_conversation_never_orders_again() {
        let harness = harness().await;
        harness.llm.push_reply(READY_REPLY);

        harness
            .pipeline
            .process_event(&message("mid.1", "2 ширхэг хар цамц авъя. Утас: 99112233. БЗД 14-р хороо"))
            .await;
        harness.pipeline.process_event(&message("mid.2", "дахиад 2 цамц нэмье")).await;
        settle().await;

        let conversation = harness
            .conversations
            .find_by_thread_id("psid-100")
            .await
            .expect("lookup")
            .expect("conversation exists");
        assert_eq!(conversation.status, ConversationStatus::OrderCreated);
        assert!(
            harness
                .orders
                .find_by_conversation_id(&conversation.id)
                .await
                .expect("lookup")
                .is_some(),
        );

        // Both turns were answered, but no second classification ran.
        assert_eq!(harness.sender.sent().len(), 2);
        assert_eq!(harness.llm.prompts().len(), 1);
        assert_eq!(harness.mirror.rows().len(), 1);
    }

    #[tokio::test]
    async fn incomplete_extraction_waits_and_asks_for_missing_fields() {
        let harness = harness().await;
        harness.llm.push_reply(INCOMPLETE_REPLY);

        harness.pipeline.process_event(&message("mid.1", "2 цамц авъя")).await;

        let conversation = harness
            .conversations
            .find_by_thread_id("psid-100")
            .await
            .expect("lookup")
            .expect("conversation exists");
        assert_eq!(conversation.status, ConversationStatus::WaitingForInfo);
        assert!(harness
            .orders
            .find_by_conversation_id(&conversation.id)
            .await
            .expect("lookup")
            .is_none());

        let sent = harness.sender.sent();
        assert!(sent[0].1.contains("утасны дугаар"));
        assert!(sent[0].1.contains("хүргэлтийн хаяг"));
    }

    #[tokio::test]
    async fn classifier_failure_degrades_to_a_safe_reply() {
        let harness = harness().await;
        harness.llm.push_failure("model timeout");

        harness.pipeline.process_event(&message("mid.1", "2 цамц авъя")).await;

        let conversation = harness
            .conversations
            .find_by_thread_id("psid-100")
            .await
            .expect("lookup")
            .expect("conversation exists");
        assert_eq!(conversation.status, ConversationStatus::New);
        assert!(harness
            .orders
            .find_by_conversation_id(&conversation.id)
            .await
            .expect("lookup")
            .is_none());
        assert_eq!(conversation.turns.len(), 2);
        assert_eq!(harness.sender.sent().len(), 1);
    }

    #[tokio::test]
    async fn send_failure_does_not_lose_the_order() {
        let harness = harness().await;
        harness.llm.push_reply(READY_REPLY);
        harness.sender.fail_all();

        harness
            .pipeline
            .process_event(&message("mid.1", "2 ширхэг хар цамц авъя. Утас: 99112233. БЗД 14-р хороо"))
            .await;
        settle().await;

        let conversation = harness
            .conversations
            .find_by_thread_id("psid-100")
            .await
            .expect("lookup")
            .expect("conversation exists");
        assert_eq!(conversation.status, ConversationStatus::OrderCreated);
        assert!(harness
            .orders
            .find_by_conversation_id(&conversation.id)
            .await
            .expect("lookup")
            .is_some());
        assert!(harness.sender.sent().is_empty());
    }

    #[tokio::test]
    async fn history_grows_across_waiting_turns() {
        let harness = harness().await;
        harness.llm.push_reply(INCOMPLETE_REPLY);
        harness.llm.push_reply(READY_REPLY);

        harness.pipeline.process_event(&message("mid.1", "2 цамц авъя")).await;
        harness
            .pipeline
            .process_event(&message("mid.2", "Утас: 99112233. БЗД 14-р хороо"))
            .await;
        settle().await;

        let conversation = harness
            .conversations
            .find_by_thread_id("psid-100")
            .await
            .expect("lookup")
            .expect("conversation exists");
        assert_eq!(conversation.status, ConversationStatus::OrderCreated);
        assert_eq!(conversation.turns.len(), 4);

        // The second prompt carries the first exchange as history.
        let prompts = harness.llm.prompts();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].contains("2 цамц авъя"));
    }

    #[tokio::test]
    async fn inquiry_message_is_answered_without_an_order() {
        let harness = harness().await;
        harness.llm.push_reply(INQUIRY_REPLY);

        harness.pipeline.process_event(&message("mid.1", "Хар цамц хэдэн төгрөг вэ?")).await;

        let conversation = harness
            .conversations
            .find_by_thread_id("psid-100")
            .await
            .expect("lookup")
            .expect("conversation exists");
        assert_eq!(conversation.status, ConversationStatus::New);
        assert_eq!(conversation.current_intent, Intent::Inquiry);
        assert!(harness
            .orders
            .find_by_conversation_id(&conversation.id)
            .await
            .expect("lookup")
            .is_none());

        let sent = harness.sender.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.contains("юу сонирхож байна вэ"));
        assert!(harness.mirror.rows().is_empty());
    }

    #[tokio::test]
    async fn failed_turn_is_retried_on_redelivery() {
        let products = Arc::new(InMemoryProductRepository::default());
        products
            .seed(vec![Product {
                id: ProductId("tshirt-black".to_string()),
                name: "хар цамц".to_string(),
                price: Decimal::new(15_000, 0),
                stock: 20,
                active: true,
            }])
            .await;

        let conversations = Arc::new(FlakyConversationRepository::default());
        let orders = Arc::new(InMemoryOrderRepository::default());
        let sender = Arc::new(RecordingMessageSender::default());
        let llm = Arc::new(ScriptedLlmClient::default());

        let pipeline = IntakePipeline::new(IntakeDependencies {
            customers: Arc::new(InMemoryCustomerRepository::default()),
            conversations: Arc::clone(&conversations) as Arc<dyn ConversationRepository>,
            orders: Arc::clone(&orders) as Arc<dyn OrderRepository>,
            products,
            processed_events: Arc::new(InMemoryProcessedEventRepository::default()),
            llm: Arc::clone(&llm) as Arc<dyn LlmClient>,
            replies: Arc::new(TemplateReplyGenerator),
            sender: Arc::clone(&sender) as Arc<dyn MessageSender>,
            mirror: Arc::new(RecordingSheetMirror::default()),
            audit: Arc::new(InMemoryAuditSink::default()),
        });

        llm.push_reply(READY_REPLY);
        llm.push_reply(READY_REPLY);
        conversations.fail_next_saves(1);

        let delivery =
            message("mid.9", "2 ширхэг хар цамц авъя. Утас: 99112233. БЗД 14-р хороо");
        pipeline.process_event(&delivery).await;
        pipeline.process_event(&delivery).await;
        settle().await;

        // The first attempt died on the save and was answered with the
        // apology; the redelivery went through because the event was not
        // yet in the ledger.
        let sent = sender.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].1, APOLOGY_REPLY);
        assert!(sent[1].1.contains("30000"));

        let conversation = conversations
            .find_by_thread_id("psid-100")
            .await
            .expect("lookup")
            .expect("conversation exists");
        assert_eq!(conversation.status, ConversationStatus::OrderCreated);
        assert!(orders
            .find_by_conversation_id(&conversation.id)
            .await
            .expect("lookup")
            .is_some());

        // A third delivery of the same id is now dropped outright.
        pipeline.process_event(&delivery).await;
        assert_eq!(sender.sent().len(), 2);
    }

    #[tokio::test]
    async fn idle_thread_locks_are_evicted() {
        let harness = harness().await;
        harness.llm.push_reply(INCOMPLETE_REPLY);

        harness.pipeline.process_event(&message("mid.1", "2 цамц авъя")).await;
        {
            let locks = harness.pipeline.thread_locks.lock().await;
            assert!(locks.contains_key("psid-100"));
        }

        // Acquiring a lock for another thread sweeps entries no turn holds.
        let held = harness.pipeline.thread_lock("psid-200").await;
        let locks = harness.pipeline.thread_locks.lock().await;
        assert!(!locks.contains_key("psid-100"));
        assert!(locks.contains_key("psid-200"));
        drop(locks);
        drop(held);
    }
}
