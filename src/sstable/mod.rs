//! Sorted String Table: the immutable on-disk tier.
//!
//! ## File Layout
//!
//! ```text
//! +--------------------+
//! | Data Block 1       |
//! +--------------------+
//! | ...                |
//! +--------------------+
//! | Data Block N       |
//! +--------------------+
//! | Bloom Filter       |
//! +--------------------+
//! | Index Block        |
//! +--------------------+
//! | Footer             |
//! +--------------------+
//! | Footer Length (u32)|
//! +--------------------+
//! ```
//!
//! Data blocks hold `(internal key, value)` records in internal-key order.
//! The bloom filter is keyed on user keys and lets point lookups skip
//! tables that cannot contain the key. The index records the last internal
//! key of every data block so a lookup reads at most one block. The footer
//! locates the filter and index; its own length sits in the trailing four
//! bytes so a reader can bootstrap from the end of the file.

pub mod footer;
pub mod index;
pub mod reader;
pub mod writer;

pub use reader::TableReader;
pub use writer::TableWriter;

/// Target size for a data block. A block may exceed this by one record:
/// the buffer is emitted once it has grown past the target.
pub const DATA_BLOCK_SIZE: usize = 4096;

/// Width of the little-endian u32 trailer holding the footer's length.
pub const FOOTER_TRAILER_SIZE: usize = 4;

/// Bloom filter false-positive target for new tables.
pub const BLOOM_FP_RATE: f64 = 0.01;
