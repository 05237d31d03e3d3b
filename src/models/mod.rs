pub mod pool;

// Re-export commonly used types
pub use pool::{PoolKeys, VaultSide};
