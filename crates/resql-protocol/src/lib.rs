pub mod backend;
pub mod buffer;
pub mod frame;
pub mod frontend;
pub mod messages;

pub use buffer::{CursorBuffer, Reader};
pub use messages::{FrontendMessage, MessageKind, ResultCode, TaskFlag, ValueTag};
