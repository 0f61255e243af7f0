pub mod groups;
pub mod messages;

pub use groups::{conversation_rows, open_conversation, ConversationRow};
pub use messages::{ConversationView, MessageRow, MessagesScreen};
