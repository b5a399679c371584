pub mod pending;
pub mod pool;

pub use pending::PendingQueue;
pub use pool::{PoolHandle, SlotHandler, WorkerPool};
