mod backend;
mod elasticsearch;
mod memory;
mod sync;

pub use backend::{FullTextIndex, IndexDocument, SearchIndex};
pub use elasticsearch::ElasticsearchIndex;
pub use memory::MemoryIndex;
pub use sync::{CommitHooks, CommitObserver, IndexSync, PendingChanges};
