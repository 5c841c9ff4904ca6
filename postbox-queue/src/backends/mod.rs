mod file;
mod memory;

pub use file::{FileQueueStore, FileRecordSink};
pub use memory::{MemoryQueueStore, MemoryRecordSink};
