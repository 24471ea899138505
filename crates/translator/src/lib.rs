//! Protocol translation: converts between the OpenAI chat-completion wire
//! format every Backend speaks and the two client-facing protocols this
//! proxy fans in from (Anthropic Messages, Open Responses). Request-side
//! conversions are pure functions; response-side streaming conversions are
//! owned adapters fed one upstream SSE chunk at a time.

pub mod chat_to_messages;
pub mod chat_to_responses;
pub mod messages_to_chat;
pub mod responses_to_chat;
pub mod stop_reason;

pub use chat_to_messages::ChatToMessagesAdapter;
pub use chat_to_responses::{ChatToResponsesAdapter, ResponsesRequestEcho};
pub use messages_to_chat::{chat_response_to_messages, messages_to_chat};
pub use responses_to_chat::{chat_response_to_responses, responses_input_to_chat};
