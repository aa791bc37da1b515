//! Memory-mapped readers for point and clustered-point text files.
//!

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs::File;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use memmap2::Mmap;
use photoncluster_core::{Clustering, Point2D, NOISE, OVERLAY_MARKER};
use rayon::prelude::*;

use crate::{Error, Result};

/// A memory-mapped file reader.
///
/// Uses memmap2 to access file contents without copying the whole file
/// into memory. Empty files are not mapped.
pub struct MappedFileReader {
    mmap: Option<Mmap>,
    path: PathBuf,
}

impl MappedFileReader {
    /// Opens a file for memory-mapped reading.
    ///
    /// # Errors
    /// Returns [`Error::Open`] if the file cannot be opened or memory-mapped.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let open_error = |source| Error::Open {
            path: path.clone(),
            source,
        };
        let file = File::open(&path).map_err(open_error)?;
        let len = file.metadata().map_err(open_error)?.len();
        let mmap = if len == 0 {
            None
        } else {
            // SAFETY: The file is opened read-only and we assume it is not modified concurrently.
            // This is the standard safety contract for memory mapping.
            #[allow(unsafe_code)]
            let mmap = unsafe { Mmap::map(&file) }.map_err(open_error)?;
            Some(mmap)
        };
        Ok(Self { mmap, path })
    }

    /// Returns the file contents as a byte slice.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.mmap.as_deref().unwrap_or_default()
    }

    /// Returns the file size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Returns true if the file is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Path the reader was opened with.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the contents as text, replacing invalid UTF-8.
    #[must_use]
    pub fn text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(self.as_bytes())
    }
}

/// Field separator of point files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Delimiter {
    /// `,`
    Comma,
    /// `;`
    Semicolon,
    /// A single tab.
    Tab,
    /// Any run of whitespace.
    Whitespace,
    /// Any run of commas, semicolons, tabs and spaces.
    #[default]
    Any,
}

impl Delimiter {
    /// Splits a trimmed line into fields.
    fn split<'a>(self, line: &'a str) -> Vec<&'a str> {
        match self {
            Self::Comma => line.split(',').map(str::trim).collect(),
            Self::Semicolon => line.split(';').map(str::trim).collect(),
            Self::Tab => line.split('\t').map(str::trim).collect(),
            Self::Whitespace => line.split_whitespace().collect(),
            Self::Any => line
                .split(|c: char| c == ',' || c == ';' || c.is_whitespace())
                .filter(|field| !field.is_empty())
                .collect(),
        }
    }
}

impl FromStr for Delimiter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "," | "comma" => Ok(Self::Comma),
            ";" | "semicolon" => Ok(Self::Semicolon),
            "\\t" | "\t" | "tab" => Ok(Self::Tab),
            "whitespace" | "space" => Ok(Self::Whitespace),
            "any" => Ok(Self::Any),
            other => Err(Error::InvalidFormat(format!(
                "unknown delimiter '{other}' (expected comma, semicolon, tab, whitespace or any)"
            ))),
        }
    }
}

impl fmt::Display for Delimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Comma => "comma",
            Self::Semicolon => "semicolon",
            Self::Tab => "tab",
            Self::Whitespace => "whitespace",
            Self::Any => "any",
        };
        f.write_str(name)
    }
}

/// Parses one line into a point. Lines without exactly two finite numbers
/// yield `None`.
#[must_use]
pub fn parse_point(line: &str, delimiter: Delimiter) -> Option<Point2D> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match delimiter.split(line).as_slice() {
        [x, y] => Point2D::try_new(x.parse().ok()?, y.parse().ok()?).ok(),
        _ => None,
    }
}

/// Line counts of a read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ReadStats {
    /// Non-blank lines seen.
    pub lines: usize,
    /// Lines that did not parse as a point.
    pub skipped: usize,
    /// Points already read earlier.
    pub duplicates: usize,
}

/// Reads two-column point files, ignoring bad lines and repeated points.
///
/// Points keep the order of their first occurrence. Reading several files
/// concatenates them, with duplicates dropped across files too.
#[derive(Debug, Default)]
pub struct PointFileReader {
    delimiter: Delimiter,
    seen: HashSet<Point2D>,
    points: Vec<Point2D>,
    stats: ReadStats,
}

impl PointFileReader {
    /// Creates a reader splitting fields on `delimiter`.
    #[must_use]
    pub fn new(delimiter: Delimiter) -> Self {
        Self {
            delimiter,
            ..Self::default()
        }
    }

    /// Reads one point per line from `text`.
    pub fn read_str(&mut self, text: &str) {
        let delimiter = self.delimiter;
        let parsed: Vec<Option<Point2D>> = text
            .par_lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| parse_point(line, delimiter))
            .collect();
        for point in parsed {
            self.accept(point);
        }
    }

    fn accept(&mut self, point: Option<Point2D>) {
        self.stats.lines += 1;
        match point {
            Some(point) if self.seen.insert(point) => self.points.push(point),
            Some(_) => self.stats.duplicates += 1,
            None => self.stats.skipped += 1,
        }
    }

    /// Reads a point file through a memory map.
    ///
    /// # Errors
    /// Returns [`Error::Open`] if the file cannot be read.
    pub fn read_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let reader = MappedFileReader::open(path)?;
        let before = self.stats;
        self.read_str(&reader.text());
        log::debug!(
            "{}: {} lines, {} skipped, {} duplicates",
            reader.path().display(),
            self.stats.lines - before.lines,
            self.stats.skipped - before.skipped,
            self.stats.duplicates - before.duplicates
        );
        Ok(())
    }

    /// Reads points from a buffered stream, line by line.
    ///
    /// # Errors
    /// Returns [`Error::Io`] if the stream fails.
    pub fn read_from<R: BufRead>(&mut self, reader: R) -> Result<()> {
        for line in reader.lines() {
            let line = line?;
            if !line.trim().is_empty() {
                self.accept(parse_point(&line, self.delimiter));
            }
        }
        Ok(())
    }

    /// Counts so far.
    #[must_use]
    pub fn stats(&self) -> ReadStats {
        self.stats
    }

    /// Points read so far.
    #[must_use]
    pub fn points(&self) -> &[Point2D] {
        &self.points
    }

    /// Consumes the reader, returning the unique points.
    #[must_use]
    pub fn into_points(self) -> Vec<Point2D> {
        self.points
    }
}

/// Reads and concatenates point files.
///
/// # Errors
/// Returns [`Error::Open`] naming the first file that cannot be read.
pub fn read_points<I, P>(paths: I, delimiter: Delimiter) -> Result<Vec<Point2D>>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    let mut reader = PointFileReader::new(delimiter);
    for path in paths {
        reader.read_file(path)?;
    }
    let stats = reader.stats();
    if stats.skipped > 0 {
        log::info!("skipped {} malformed lines", stats.skipped);
    }
    log::info!(
        "read {} points ({} duplicates ignored)",
        reader.points().len(),
        stats.duplicates
    );
    Ok(reader.into_points())
}

/// Parses `x,y,clusterId` text back into a clustering.
///
/// Fields are split on any run of commas, semicolons, tabs and spaces. Id
/// `-1` marks noise; overlay markers are ignored, as are lines that do not
/// parse.
#[must_use]
pub fn parse_clustered(text: &str) -> Clustering {
    let mut clusters: BTreeMap<i32, Vec<Point2D>> = BTreeMap::new();
    let mut noise = Vec::new();
    let mut skipped = 0usize;

    for line in text.lines().map(str::trim).filter(|line| !line.is_empty()) {
        let parsed = match Delimiter::Any.split(line).as_slice() {
            [x, y, id] => x
                .parse::<f64>()
                .ok()
                .zip(y.parse::<f64>().ok())
                .zip(id.parse::<i32>().ok())
                .and_then(|((x, y), id)| Point2D::try_new(x, y).ok().map(|p| (p, id))),
            _ => None,
        };
        match parsed {
            Some((point, NOISE)) => noise.push(point),
            Some((_, OVERLAY_MARKER)) => {}
            Some((point, id)) => clusters.entry(id).or_default().push(point),
            None => skipped += 1,
        }
    }
    if skipped > 0 {
        log::debug!("skipped {skipped} malformed clustered lines");
    }
    Clustering::new(clusters, noise, 0)
}

/// Reads a clustered-point file written by
/// [`ResultWriter::write_clustering`](crate::ResultWriter::write_clustering).
///
/// # Errors
/// Returns [`Error::Open`] if the file cannot be read.
pub fn read_clustered<P: AsRef<Path>>(path: P) -> Result<Clustering> {
    let reader = MappedFileReader::open(path)?;
    let clustering = parse_clustered(&reader.text());
    log::info!(
        "{}: {} clusters, {} noise points",
        reader.path().display(),
        clustering.cluster_count(),
        clustering.outliers().len()
    );
    Ok(clustering)
}
