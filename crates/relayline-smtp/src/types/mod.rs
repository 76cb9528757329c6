//! Core SMTP types.

mod address;
mod capability;
mod reply;

pub use address::{Address, Envelope, Recipient, RecipientKind};
pub use capability::{AuthMechanism, Extension, ServerInfo};
pub use reply::{ReplyCode, Response};
