pub mod content;
pub mod error;
pub mod frame;
pub mod message;
pub mod user;

pub use error::{Error, Result};
pub use frame::{ClientFrame, ServerFrame};
pub use message::Message;
pub use user::{Role, User};
