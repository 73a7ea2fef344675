//! Binary quadtree index codec and the streaming partition-listing parser
//! (spec §3, §4.4).

pub mod index;
pub mod sax;

pub use index::{IndexData, QuadTreeIndex};
pub use sax::stream_partitions;
