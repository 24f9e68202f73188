pub mod engine;
pub mod mem;
pub mod persistent;
pub mod snapshot;
pub mod traits;
pub mod walbin;

pub use engine::DocumentStore;
pub use mem::{InMemoryStore, Tables};
pub use persistent::{recover, PersistentStore};
pub use traits::*;
pub use walbin::WalOptions;
