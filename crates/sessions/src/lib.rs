pub mod registry;
pub mod stream;

pub use registry::SessionRegistry;
pub use stream::{SinkReceiver, StreamMultiplexer};
