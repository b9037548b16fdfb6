pub mod prelude;

pub mod chat;
pub mod message;
pub mod message_edit;
pub mod user;
