pub mod bridge;
pub mod duplex;
pub mod process;
pub mod queue;

pub use bridge::Bridge;
pub use duplex::duplex_router;
pub use process::{BrowserProcess, BrowserStatus};
pub use queue::{MessageQueue, QueueHandle};
