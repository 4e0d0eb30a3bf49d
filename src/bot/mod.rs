/// Gallery rendering to Telegram HTML
pub mod format;
/// Update handlers
pub mod handlers;
/// Message delivery with splitting and retries
pub mod messaging;

pub use messaging::Layout;
