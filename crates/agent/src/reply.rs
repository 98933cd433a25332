use async_trait::async_trait;

use delguur_core::domain::conversation::{Conversation, Sender};
use delguur_core::domain::order::Order;
use delguur_core::extraction::Extraction;
use delguur_core::phone::PHONE_UNKNOWN;
use delguur_core::readiness::ReadinessDecision;

use crate::classifier::HISTORY_WINDOW;
use crate::llm::LlmClient;

/// Sent whenever a reply cannot be generated. Fixed so the customer always
/// gets a coherent Mongolian sentence no matter what failed upstream.
pub const APOLOGY_REPLY: &str =
    "Уучлаарай, түр зуурын алдаа гарлаа. Та дахин оролдоно уу.";

#[derive(Clone, Copy)]
pub struct ReplyContext<'a> {
    pub conversation: &'a Conversation,
    pub extraction: &'a Extraction,
    pub decision: &'a ReadinessDecision,
    pub order: Option<&'a Order>,
}

/// Reply generation never fails; implementations degrade to fixed text.
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    async fn reply(&self, context: ReplyContext<'_>) -> String;
}

/// Deterministic Mongolian templates. Used directly in tests and as the
/// wording reference for the model-backed generator.
#[derive(Clone, Debug, Default)]
pub struct TemplateReplyGenerator;

fn missing_field_label(field: &str) -> &str {
    match field {
        "phone" => "утасны дугаар",
        "address" => "хүргэлтийн хаяг",
        _ => "захиалах бараа",
    }
}

impl TemplateReplyGenerator {
    fn render(&self, context: ReplyContext<'_>) -> String {
        match context.decision {
            ReadinessDecision::Ready => match context.order {
                Some(order) if order.phone != PHONE_UNKNOWN => format!(
                    "Таны захиалга амжилттай бүртгэгдлээ. Нийт дүн: {}₮. Бид тантай {} дугаараар холбогдоно. Баярлалаа!",
                    order.total, order.phone
                ),
                Some(order) => format!(
                    "Таны захиалга амжилттай бүртгэгдлээ. Нийт дүн: {}₮. Баярлалаа!",
                    order.total
                ),
                None => "Таны захиалга амжилттай бүртгэгдлээ. Баярлалаа!".to_string(),
            },
            ReadinessDecision::Incomplete { missing_fields } => {
                if missing_fields.is_empty() {
                    "Захиалгаа баталгаажуулахын тулд мэдээллээ бүрэн илгээнэ үү.".to_string()
                } else {
                    let wanted: Vec<&str> =
                        missing_fields.iter().map(|field| missing_field_label(field)).collect();
                    format!(
                        "Захиалгаа баталгаажуулахын тулд {} илгээнэ үү.",
                        wanted.join(", ")
                    )
                }
            }
            ReadinessDecision::NonOrdering => {
                "Сайн байна уу! Манай дэлгүүрээс юу сонирхож байна вэ?".to_string()
            }
        }
    }
}

#[async_trait]
impl ReplyGenerator for TemplateReplyGenerator {
    async fn reply(&self, context: ReplyContext<'_>) -> String {
        self.render(context)
    }
}

pub struct LlmReplyGenerator<C> {
    llm: C,
}

impl<C> LlmReplyGenerator<C>
where
    C: LlmClient,
{
    pub fn new(llm: C) -> Self {
        Self { llm }
    }

    fn build_prompt(&self, context: ReplyContext<'_>) -> String {
        let mut prompt = String::from(
            "You are a friendly Mongolian online-shop assistant. Write ONE short reply in \
             Mongolian for the customer. No JSON, no markdown.\n\n",
        );

        match context.decision {
            ReadinessDecision::Ready => {
                if let Some(order) = context.order {
                    prompt.push_str(&format!(
                        "The order was just registered. Confirm it and mention the total of {}₮.\n",
                        order.total
                    ));
                } else {
                    prompt.push_str("The order was just registered. Confirm it warmly.\n");
                }
            }
            ReadinessDecision::Incomplete { missing_fields } => {
                prompt.push_str(&format!(
                    "The customer wants to order but these details are missing: {}. Ask for them politely.\n",
                    missing_fields.join(", ")
                ));
                let named: Vec<&str> = context
                    .extraction
                    .data
                    .items
                    .iter()
                    .map(|item| item.name.as_str())
                    .collect();
                if !named.is_empty() {
                    prompt.push_str(&format!(
                        "They already named these items: {}. Do not ask for those again.\n",
                        named.join(", ")
                    ));
                }
            }
            ReadinessDecision::NonOrdering => {
                prompt.push_str(
                    "The customer is not ordering yet. Answer helpfully and invite them to browse.\n",
                );
            }
        }

        let turns = context.conversation.recent_turns(HISTORY_WINDOW);
        if !turns.is_empty() {
            prompt.push_str("\nConversation:\n");
            for turn in turns {
                let speaker = match turn.sender {
                    Sender::Customer => "customer",
                    Sender::Bot => "bot",
                };
                prompt.push_str(&format!("{speaker}: {}\n", turn.text));
            }
        }

        prompt
    }
}

#[async_trait]
impl<C> ReplyGenerator for LlmReplyGenerator<C>
where
    C: LlmClient,
{
    async fn reply(&self, context: ReplyContext<'_>) -> String {
        let prompt = self.build_prompt(context);

        match self.llm.complete(&prompt).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => APOLOGY_REPLY.to_string(),
            Err(error) => {
                tracing::warn!(
                    event_name = "reply.llm_failed",
                    error = %error,
                    "reply generation fell back to the fixed apology"
                );
                APOLOGY_REPLY.to_string()
            }
        }
    }
}
