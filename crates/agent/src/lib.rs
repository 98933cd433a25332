pub mod classifier;
pub mod llm;
pub mod reply;

pub use classifier::{Classifier, HISTORY_WINDOW};
pub use llm::{HttpLlmClient, LlmClient, ScriptedLlmClient};
pub use reply::{
    LlmReplyGenerator, ReplyContext, ReplyGenerator, TemplateReplyGenerator, APOLOGY_REPLY,
};
