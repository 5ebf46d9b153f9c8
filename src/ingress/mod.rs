pub mod buffer;
pub mod encoder;
pub mod message;

pub use buffer::{Buffer, FlushPolicy};
pub use encoder::encode;
pub use message::{Message, ToMessage, Value};
