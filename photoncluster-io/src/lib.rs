//! photoncluster-io: Point and cluster file I/O for photoncluster.
//!
//! Input files are memory-mapped via memmap2 and parsed line by line;
//! results are written as headerless plain text.
//!

mod error;
mod reader;
mod writer;

pub use error::{Error, Result};
pub use reader::{
    parse_clustered, parse_point, read_clustered, read_points, Delimiter, MappedFileReader,
    PointFileReader, ReadStats,
};
pub use writer::ResultWriter;
