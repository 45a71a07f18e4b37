mod block;
mod preload;
mod tx;

pub use block::BlockExecutor;
pub use preload::{spawn_preload_service, PreloadHandle};
pub use tx::execute_tx;
