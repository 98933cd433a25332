pub mod events;
pub mod send;

pub use events::{parse_webhook_payload, verify_subscription, InboundMessage};
pub use send::{
    HttpMessageSender, MessageSender, NoopMessageSender, RecordingMessageSender, SendError,
};
