//! Record sorting for BAM pipelines.
//!
//! - **Queryname**: Groups reads by read name so templates are contiguous
//! - **Coordinate**: Standard genomic coordinate order
//!
//! [`SortingBuffer`] accumulates records in memory, spills sorted chunks to temporary BAM
//! files when its memory limit is reached, and merges them back with a min-heap.

pub mod buffer;
pub mod keys;

pub use buffer::{DEFAULT_MEMORY_LIMIT, SortedRecords, SortingBuffer};
pub use keys::{CoordinateKey, QuerynameKey, SortKey, SortOrder};
