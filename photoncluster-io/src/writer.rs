//! Text writers for clustering results.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use photoncluster_algorithms::{DirectionalScore, KDistanceCurve};
use photoncluster_core::{ClusterPoint, Clustering};

use crate::{Error, Result};

/// Writer for clustering and filter output.
///
/// Every format is headerless plain text, one record per line.
pub struct ResultWriter<W: Write> {
    writer: BufWriter<W>,
}

impl ResultWriter<File> {
    /// Creates a new file writer.
    ///
    /// # Errors
    /// Returns [`Error::Open`] if the file cannot be created.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(&path).map_err(|source| Error::Open {
            path: path.as_ref().to_path_buf(),
            source,
        })?;
        Ok(Self::new(file))
    }
}

impl<W: Write> ResultWriter<W> {
    /// Wraps any writer.
    pub fn new(inner: W) -> Self {
        Self {
            writer: BufWriter::new(inner),
        }
    }

    /// Writes `x,y,clusterId` lines: clusters in id order, then outliers
    /// with id `-1`.
    ///
    /// # Errors
    /// Returns [`Error::Io`] on write failure.
    pub fn write_clustering(&mut self, clustering: &Clustering) -> Result<()> {
        self.write_labels_csv(&clustering.cluster_points())
    }

    /// Writes `x,y,label` lines in the given order.
    ///
    /// # Errors
    /// Returns [`Error::Io`] on write failure.
    pub fn write_labels_csv(&mut self, labels: &[ClusterPoint]) -> Result<()> {
        for cp in labels {
            writeln!(self.writer, "{},{},{}", cp.point.x(), cp.point.y(), cp.cluster_id)?;
        }
        self.writer.flush()?;
        Ok(())
    }

    /// Writes `rank<TAB>k-distance` lines.
    ///
    /// # Errors
    /// Returns [`Error::Io`] on write failure.
    pub fn write_k_distances(&mut self, curve: &KDistanceCurve) -> Result<()> {
        for (rank, k_distance) in curve.ranked() {
            writeln!(self.writer, "{rank}\t{k_distance}")?;
        }
        self.writer.flush()?;
        Ok(())
    }

    /// Writes `x y theta score` lines.
    ///
    /// # Errors
    /// Returns [`Error::Io`] on write failure.
    pub fn write_directional_scores(&mut self, scores: &[DirectionalScore]) -> Result<()> {
        for s in scores {
            writeln!(
                self.writer,
                "{} {} {} {}",
                s.point.x(),
                s.point.y(),
                s.theta_degrees,
                s.score
            )?;
        }
        self.writer.flush()?;
        Ok(())
    }

    /// Writes `x y label` lines.
    ///
    /// # Errors
    /// Returns [`Error::Io`] on write failure.
    pub fn write_labels(&mut self, labels: &[ClusterPoint]) -> Result<()> {
        for cp in labels {
            writeln!(self.writer, "{} {} {}", cp.point.x(), cp.point.y(), cp.cluster_id)?;
        }
        self.writer.flush()?;
        Ok(())
    }

    /// Flushes the writer.
    ///
    /// # Errors
    /// Returns [`Error::Io`] on write failure.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::read_clustered;
    use photoncluster_algorithms::{DistanceCache, KDistanceConfig, KDistanceEstimator};
    use photoncluster_core::{Point2D, NOISE};
    use std::collections::BTreeMap;
    use tempfile::NamedTempFile;

    fn sample() -> Clustering {
        let mut clusters = BTreeMap::new();
        clusters.insert(0, vec![Point2D::new(0.0, 0.0), Point2D::new(0.5, 0.0)]);
        clusters.insert(1, vec![Point2D::new(10.0, 10.0)]);
        Clustering::new(clusters, vec![Point2D::new(-3.25, 7.0)], 3)
    }

    #[test]
    fn test_write_clustering_csv() {
        let mut out = Vec::new();
        ResultWriter::new(&mut out).write_clustering(&sample()).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "0,0,0\n0.5,0,0\n10,10,1\n-3.25,7,-1\n");
    }

    #[test]
    fn test_clustering_file_reads_back() {
        let file = NamedTempFile::new().unwrap();
        ResultWriter::create(file.path())
            .unwrap()
            .write_clustering(&sample())
            .unwrap();

        let back = read_clustered(file.path()).unwrap();
        assert_eq!(back.partition(), sample().partition());
        assert_eq!(back.outliers(), sample().outliers());
    }

    #[test]
    fn test_write_k_distances() {
        let points = vec![Point2D::new(0.0, 0.0), Point2D::new(3.0, 4.0)];
        let cache = DistanceCache::new(16).unwrap();
        let curve = KDistanceEstimator::new(KDistanceConfig { k: 1, parallelism: 1 }, &cache)
            .unwrap()
            .estimate(&points)
            .unwrap();

        let mut out = Vec::new();
        ResultWriter::new(&mut out).write_k_distances(&curve).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "0\t5\n1\t5\n");
    }

    #[test]
    fn test_write_directional_output() {
        let scores = vec![DirectionalScore {
            point: Point2D::new(1.0, 2.0),
            theta_degrees: 45.0,
            score: 0.5,
        }];
        let labels = vec![
            ClusterPoint::new(Point2D::new(1.0, 2.0), 0),
            ClusterPoint::new(Point2D::new(3.0, 4.0), NOISE),
        ];

        let mut out = Vec::new();
        let mut writer = ResultWriter::new(&mut out);
        writer.write_directional_scores(&scores).unwrap();
        writer.write_labels(&labels).unwrap();
        drop(writer);
        assert_eq!(String::from_utf8(out).unwrap(), "1 2 45 0.5\n1 2 0\n3 4 -1\n");
    }

    #[test]
    fn test_create_in_missing_dir_fails() {
        let err = ResultWriter::create("/nonexistent/dir/out.csv")
            .err()
            .unwrap();
        assert!(matches!(err, Error::Open { .. }));
    }
}
