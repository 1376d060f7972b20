//! Lateral asymmetry: distances between the spectra of left and right homologous structures.

use std::fs::File;
use std::path::{Path, PathBuf};

use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, Array2, Axis};
use ndarray_stats::CorrelationExt;
use serde::Deserialize;

use crate::error::{BrainprintError, Result};
use crate::pipeline::ResultRow;
use crate::structures::Laterality;


/// Distance measure between two eigenvalue vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceKind {
    /// Euclidean distance.
    Euc,
    /// Mahalanobis distance under a classical covariance.
    Mahalanobis,
    /// Mahalanobis distance under a Minimum Covariance Determinant estimate.
    Robust,
}

impl Default for DistanceKind {
    fn default() -> DistanceKind {
        DistanceKind::Euc
    }
}

impl std::str::FromStr for DistanceKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<DistanceKind, String> {
        match s {
            "euc" => Ok(DistanceKind::Euc),
            "mahalanobis" => Ok(DistanceKind::Mahalanobis),
            "robust" => Ok(DistanceKind::Robust),
            other => Err(format!("unknown distance '{}', expected one of euc, mahalanobis, robust", other)),
        }
    }
}


/// Where the covariance for the Mahalanobis type distances comes from. Both are header-less CSV files of floats.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CovarianceSource {
    /// A p x p covariance matrix.
    Matrix(PathBuf),
    /// Reference eigenvalue vectors, one per row, to estimate the covariance from.
    Samples(PathBuf),
}


/// The distance between the spectra of one left/right pair.
#[derive(Debug, Clone, PartialEq)]
pub struct AsymmetryRecord {
    pub left: &'static str,
    pub right: &'static str,
    pub distance: f64,
    /// The common length both vectors were cut to, if they differed in length.
    pub truncated_to: Option<usize>,
}

impl AsymmetryRecord {
    /// The pair identifier `<left>_<right>`.
    pub fn pair_name(&self) -> String {
        format!("{}_{}", self.left, self.right)
    }
}


/// Read a header-less CSV file of floats. Lines starting with '#' are comments.
pub fn read_float_table<P: AsRef<Path>>(path: P) -> Result<Array2<f64>> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .comment(Some(b'#'))
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(File::open(path)?);

    let mut values: Vec<f64> = Vec::new();
    let mut num_cols: Option<usize> = None;
    let mut num_rows = 0;
    for record in reader.records() {
        let record = record?;
        if num_cols.map_or(false, |n| n != record.len()) {
            return Err(BrainprintError::Covariance(format!("row {} of '{}' has {} values, expected {}", num_rows + 1, path.display(), record.len(), num_cols.unwrap_or(0))));
        }
        num_cols = Some(record.len());
        for field in record.iter() {
            let v: f64 = field.parse().map_err(|_| BrainprintError::Covariance(format!("invalid number '{}' in '{}'", field, path.display())))?;
            values.push(v);
        }
        num_rows += 1;
    }

    let num_cols = num_cols.ok_or_else(|| BrainprintError::Covariance(format!("'{}' contains no data", path.display())))?;
    Array2::from_shape_vec((num_rows, num_cols), values).map_err(|e| BrainprintError::Covariance(e.to_string()))
}


/// Classical sample covariance of the rows of `samples`.
pub fn sample_covariance(samples: &Array2<f64>) -> Result<Array2<f64>> {
    if samples.nrows() < 2 {
        return Err(BrainprintError::Covariance(format!("need at least 2 samples to estimate a covariance, got {}", samples.nrows())));
    }
    samples.t().cov(1.0).map_err(|e| BrainprintError::Covariance(e.to_string()))
}


/// Minimum Covariance Determinant estimate of the covariance of the rows of `samples`.
///
/// Starts from the half of the samples closest to the coordinate-wise median and applies
/// concentration steps until the subset no longer changes. The returned covariance is the
/// raw covariance of the final subset, without consistency correction.
pub fn mcd_covariance(samples: &Array2<f64>) -> Result<Array2<f64>> {
    let (n, p) = samples.dim();
    if n < 2 {
        return Err(BrainprintError::Covariance(format!("need at least 2 samples to estimate a covariance, got {}", n)));
    }
    let h = ((n + p + 1) / 2).max(2).min(n);

    let median: Vec<f64> = samples.axis_iter(Axis(1)).map(|col| median_of(col.to_vec())).collect();
    let mad: Vec<f64> = samples.axis_iter(Axis(1)).zip(median.iter())
        .map(|(col, m)| median_of(col.iter().map(|v| (v - m).abs()).collect()))
        .collect();
    let initial: Vec<f64> = samples.outer_iter().map(|row| {
        row.iter().enumerate().map(|(j, v)| {
            let scale = if mad[j] > 0.0 { mad[j] } else { 1.0 };
            ((v - median[j]) / scale).powi(2)
        }).sum()
    }).collect();
    let mut subset = smallest(&initial, h);

    let mut covariance = subset_covariance(samples, &subset)?;
    for _ in 0..100 {
        let mean = samples.select(Axis(0), &subset).mean_axis(Axis(0))
            .ok_or_else(|| BrainprintError::Covariance(String::from("empty MCD subset")))?;
        let inverse = pseudo_inverse(&covariance)?;
        let distances: Vec<f64> = samples.outer_iter()
            .map(|row| mahalanobis_squared(&(&row - &mean), &inverse))
            .collect();
        let next = smallest(&distances, h);
        if next == subset {
            break;
        }
        subset = next;
        covariance = subset_covariance(samples, &subset)?;
    }
    Ok(covariance)
}

fn subset_covariance(samples: &Array2<f64>, subset: &[usize]) -> Result<Array2<f64>> {
    sample_covariance(&samples.select(Axis(0), subset))
}

fn median_of(mut values: Vec<f64>) -> f64 {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = values.len();
    if n == 0 {
        return f64::NAN;
    }
    if n % 2 == 1 { values[n / 2] } else { (values[n / 2 - 1] + values[n / 2]) / 2.0 }
}

/// Sorted indices of the `h` smallest values.
fn smallest(values: &[f64], h: usize) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..values.len()).collect();
    idx.sort_by(|&a, &b| values[a].partial_cmp(&values[b]).unwrap_or(std::cmp::Ordering::Equal).then(a.cmp(&b)));
    idx.truncate(h);
    idx.sort_unstable();
    idx
}

fn to_nalgebra(m: &Array2<f64>) -> DMatrix<f64> {
    DMatrix::from_fn(m.nrows(), m.ncols(), |i, j| m[[i, j]])
}

/// Moore-Penrose pseudo-inverse, so that singular covariances can be used.
fn pseudo_inverse(m: &Array2<f64>) -> Result<DMatrix<f64>> {
    let scale = m.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
    to_nalgebra(m)
        .pseudo_inverse(scale.max(f64::MIN_POSITIVE) * 1e-12)
        .map_err(|e| BrainprintError::Covariance(e.to_string()))
}

fn mahalanobis_squared(d: &Array1<f64>, inverse: &DMatrix<f64>) -> f64 {
    let d = DVector::from_iterator(d.len(), d.iter().cloned());
    (d.transpose() * inverse * &d)[(0, 0)]
}


/// Computes left/right distances, optionally under a covariance.
#[derive(Debug, Clone)]
pub struct AsymmetryAnalyzer {
    kind: DistanceKind,
    covariance: Option<Array2<f64>>,
}


impl AsymmetryAnalyzer {

    /// An analyzer for the Euclidean distance.
    pub fn euclidean() -> AsymmetryAnalyzer {
        AsymmetryAnalyzer { kind: DistanceKind::Euc, covariance: None }
    }

    /// An analyzer for a Mahalanobis type distance under the given covariance matrix.
    pub fn with_covariance(kind: DistanceKind, covariance: Array2<f64>) -> Result<AsymmetryAnalyzer> {
        if covariance.nrows() != covariance.ncols() {
            return Err(BrainprintError::Covariance(format!("covariance matrix must be square, got {} x {}", covariance.nrows(), covariance.ncols())));
        }
        Ok(AsymmetryAnalyzer { kind, covariance: Some(covariance) })
    }

    /// Set up an analyzer for the given distance, loading or estimating the covariance if the distance needs one.
    ///
    /// # Errors
    ///
    /// `BrainprintError::Covariance` if a needed covariance is not given, cannot be read, or the source
    /// does not fit the distance (the robust distance needs samples).
    pub fn new(kind: DistanceKind, source: Option<&CovarianceSource>) -> Result<AsymmetryAnalyzer> {
        match (kind, source) {
            (DistanceKind::Euc, _) => Ok(AsymmetryAnalyzer::euclidean()),
            (_, None) => Err(BrainprintError::Covariance(String::from("distance needs a covariance matrix or reference samples"))),
            (DistanceKind::Mahalanobis, Some(CovarianceSource::Matrix(path))) => {
                AsymmetryAnalyzer::with_covariance(kind, read_float_table(path)?)
            },
            (DistanceKind::Mahalanobis, Some(CovarianceSource::Samples(path))) => {
                AsymmetryAnalyzer::with_covariance(kind, sample_covariance(&read_float_table(path)?)?)
            },
            (DistanceKind::Robust, Some(CovarianceSource::Samples(path))) => {
                AsymmetryAnalyzer::with_covariance(kind, mcd_covariance(&read_float_table(path)?)?)
            },
            (DistanceKind::Robust, Some(CovarianceSource::Matrix(_))) => {
                Err(BrainprintError::Covariance(String::from("the robust distance estimates its covariance from reference samples, not from a matrix")))
            },
        }
    }

    pub fn kind(&self) -> DistanceKind {
        self.kind
    }

    /// The distance between two eigenvalue vectors of equal length. NaN entries give a NaN distance.
    pub fn distance(&self, a: &[f64], b: &[f64]) -> Result<f64> {
        let m = a.len().min(b.len());
        if a[..m].iter().chain(b[..m].iter()).any(|v| v.is_nan()) {
            return Ok(f64::NAN);
        }
        let diff: Array1<f64> = a[..m].iter().zip(b[..m].iter()).map(|(x, y)| x - y).collect();

        match &self.covariance {
            None => Ok(diff.dot(&diff).sqrt()),
            Some(covariance) => {
                if covariance.nrows() < m {
                    return Err(BrainprintError::Covariance(format!("covariance is {} x {}, but {} eigenvalues are compared", covariance.nrows(), covariance.ncols(), m)));
                }
                let block = covariance.slice(ndarray::s![..m, ..m]).to_owned();
                let inverse = pseudo_inverse(&block)?;
                Ok(mahalanobis_squared(&diff, &inverse).max(0.0).sqrt())
            },
        }
    }

    /// Distances for all left/right pairs among the rows of one subject, ordered by the left structure.
    /// Pairs with a missing side are skipped.
    pub fn analyze(&self, subject_id: &str, rows: &[ResultRow]) -> Result<Vec<AsymmetryRecord>> {
        let mut lefts: Vec<&ResultRow> = rows.iter().filter(|r| r.structure.laterality == Laterality::Left).collect();
        lefts.sort_by_key(|r| r.structure.id);

        let mut records = Vec::with_capacity(lefts.len());
        for left in lefts {
            let right = rows.iter().find(|r| {
                r.structure.laterality == Laterality::Right && r.structure.bilateral_name() == left.structure.bilateral_name()
            });
            let right = match right {
                Some(r) => r,
                None => {
                    log::warn!("Subject '{}': no right counterpart for structure '{}', skipping its asymmetry.", subject_id, left.structure.name);
                    continue;
                },
            };

            let (l, r) = (&left.eigenvalues, &right.eigenvalues);
            let truncated_to = if l.len() != r.len() {
                let m = l.len().min(r.len());
                log::warn!("Subject '{}': spectra of '{}' ({}) and '{}' ({}) differ in length, comparing the first {} eigenvalues.",
                    subject_id, left.structure.name, l.len(), right.structure.name, r.len(), m);
                Some(m)
            } else {
                None
            };

            let distance = self.distance(l, r)?;
            if distance.is_nan() {
                log::warn!("Subject '{}': NaN eigenvalues for '{}' or '{}', their distance is NaN.", subject_id, left.structure.name, right.structure.name);
            }
            records.push(AsymmetryRecord { left: left.structure.name, right: right.structure.name, distance, truncated_to });
        }
        Ok(records)
    }
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::structures::structure_by_name;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use std::io::Write;

    fn row(name: &str, eigenvalues: Vec<f64>) -> ResultRow {
        ResultRow {
            structure: structure_by_name(name).unwrap(),
            area: 1.0,
            volume: 1.0,
            eigenvalues,
            eigenvectors: None,
        }
    }

    fn samples() -> Array2<f64> {
        array![
            [0.0, 1.0, 2.0],
            [0.0, 1.2, 2.1],
            [0.0, 0.9, 2.3],
            [0.0, 1.1, 1.8],
            [0.0, 1.0, 2.2],
            [0.0, 0.8, 1.9],
            [0.0, 1.3, 2.0],
        ]
    }

    #[test]
    fn identical_vectors_have_zero_distance() {
        let a = vec![0.0, 1.0, 2.0];
        let cov = sample_covariance(&samples()).unwrap();
        let robust = mcd_covariance(&samples()).unwrap();
        let analyzers = vec![
            AsymmetryAnalyzer::euclidean(),
            AsymmetryAnalyzer::with_covariance(DistanceKind::Mahalanobis, cov).unwrap(),
            AsymmetryAnalyzer::with_covariance(DistanceKind::Robust, robust).unwrap(),
        ];
        for analyzer in analyzers.iter() {
            assert_abs_diff_eq!(0.0, analyzer.distance(&a, &a).unwrap(), epsilon = 1e-12);
        }
    }

    #[test]
    fn the_euclidean_distance_is_computed() {
        let d = AsymmetryAnalyzer::euclidean().distance(&[0.0, 3.0, 4.0], &[0.0, 0.0, 0.0]).unwrap();
        assert_abs_diff_eq!(5.0, d, epsilon = 1e-12);
    }

    #[test]
    fn the_mahalanobis_distance_uses_the_inverse_covariance() {
        let cov = array![[4.0, 0.0], [0.0, 1.0]];
        let analyzer = AsymmetryAnalyzer::with_covariance(DistanceKind::Mahalanobis, cov).unwrap();
        assert_abs_diff_eq!(2.0_f64.sqrt(), analyzer.distance(&[2.0, 1.0], &[0.0, 0.0]).unwrap(), epsilon = 1e-9);
    }

    #[test]
    fn singular_covariances_are_pseudo_inverted() {
        // The first eigenvalue is always zero, so its variance is zero.
        let cov = sample_covariance(&samples()).unwrap();
        assert_abs_diff_eq!(0.0, cov[[0, 0]], epsilon = 1e-15);
        let analyzer = AsymmetryAnalyzer::with_covariance(DistanceKind::Mahalanobis, cov).unwrap();
        let d = analyzer.distance(&[0.0, 1.0, 2.0], &[0.0, 1.1, 2.1]).unwrap();
        assert!(d.is_finite() && d > 0.0);
    }

    #[test]
    fn mismatched_lengths_are_truncated() {
        let rows = vec![
            row("Left-Hippocampus", vec![0.0, 1.0, 2.0, 3.0]),
            row("Right-Hippocampus", vec![0.0, 1.0, 2.0]),
        ];
        let records = AsymmetryAnalyzer::euclidean().analyze("s1", &rows).unwrap();
        assert_eq!(1, records.len());
        assert_eq!("Left-Hippocampus_Right-Hippocampus", records[0].pair_name());
        assert_eq!(Some(3), records[0].truncated_to);
        assert_abs_diff_eq!(0.0, records[0].distance, epsilon = 1e-12);
    }

    #[test]
    fn nan_eigenvalues_give_a_nan_distance() {
        let rows = vec![
            row("lh-white-2d", vec![0.0, f64::NAN]),
            row("rh-white-2d", vec![0.0, 1.0]),
        ];
        let records = AsymmetryAnalyzer::euclidean().analyze("s1", &rows).unwrap();
        assert!(records[0].distance.is_nan());
    }

    #[test]
    fn pairs_are_found_by_bilateral_name_and_ordered() {
        let rows = vec![
            row("Right-Amygdala", vec![0.0, 2.0]),
            row("Left-Caudate", vec![0.0, 1.0]),
            row("Left-Amygdala", vec![0.0, 1.0]),
            row("Right-Caudate", vec![0.0, 1.0]),
            row("Left-Putamen", vec![0.0, 1.0]),
            row("Brain-Stem", vec![0.0, 1.0]),
        ];
        let records = AsymmetryAnalyzer::euclidean().analyze("s1", &rows).unwrap();
        let names: Vec<String> = records.iter().map(|r| r.pair_name()).collect();
        assert_eq!(vec!["Left-Caudate_Right-Caudate", "Left-Amygdala_Right-Amygdala"], names);
        assert_abs_diff_eq!(1.0, records[1].distance, epsilon = 1e-12);
    }

    #[test]
    fn covariances_are_read_from_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cov.csv");
        let mut f = File::create(&path).unwrap();
        writeln!(f, "# covariance of 2 eigenvalues").unwrap();
        writeln!(f, "4.0, 0.0").unwrap();
        writeln!(f, "0.0, 1.0").unwrap();
        drop(f);

        let source = CovarianceSource::Matrix(path);
        let analyzer = AsymmetryAnalyzer::new(DistanceKind::Mahalanobis, Some(&source)).unwrap();
        assert_abs_diff_eq!(1.0, analyzer.distance(&[2.0], &[0.0]).unwrap(), epsilon = 1e-9);
        // Three compared eigenvalues do not fit a 2 x 2 covariance.
        assert!(analyzer.distance(&[0.0, 1.0, 2.0], &[0.0, 1.0, 2.0]).is_err());
        assert!(AsymmetryAnalyzer::new(DistanceKind::Robust, Some(&source)).is_err());
        assert!(AsymmetryAnalyzer::new(DistanceKind::Mahalanobis, None).is_err());
    }

    #[test]
    fn the_mcd_estimate_ignores_outliers() {
        let mut data = samples().into_raw_vec();
        data.extend_from_slice(&[0.0, 50.0, -40.0]);
        let contaminated = Array2::from_shape_vec((8, 3), data).unwrap();

        let classical = sample_covariance(&contaminated).unwrap();
        let robust = mcd_covariance(&contaminated).unwrap();
        assert!(robust[[1, 1]] < 0.1);
        assert!(classical[[1, 1]] > 100.0);
    }
}
