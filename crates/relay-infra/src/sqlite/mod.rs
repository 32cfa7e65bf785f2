//! SQLite-backed index and dead letter queue.

pub mod dead_letter;
pub mod index;
pub mod pool;

pub use dead_letter::SqliteDeadLetterStore;
pub use index::SqliteIndex;
pub use pool::DatabasePool;
