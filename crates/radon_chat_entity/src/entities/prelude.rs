pub use super::chat::Entity as Chat;
pub use super::message::Entity as Message;
pub use super::message_edit::Entity as MessageEdit;
pub use super::user::Entity as User;
