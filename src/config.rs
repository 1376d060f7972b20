//! Run configuration.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::asymmetry::{CovarianceSource, DistanceKind};
use crate::error::{BrainprintError, Result};
use crate::normalize::Norm;
use crate::solver::SolverKind;
use crate::structures::{select_structures, structure_by_name, Structure};


/// All settings of a BrainPrint run. Deserializable from TOML, all fields are optional there.
///
/// # Examples
///
/// ```
/// let config = brainprint::BrainprintConfig::from_toml_str("num = 10\nnorm = \"surface\"").unwrap();
/// assert_eq!(10, config.num);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BrainprintConfig {
    /// Number of eigenvalues per structure.
    pub num: usize,
    /// Also compute and write eigenvectors.
    pub evec: bool,
    /// Leave out the white and pial cortical surfaces.
    pub skip_cortex: bool,
    pub norm: Norm,
    /// Divide eigenvalue i by i.
    pub reweight: bool,
    /// Compute left/right distances.
    pub asymmetry: bool,
    pub asymmetry_distance: DistanceKind,
    pub covariance: Option<CovarianceSource>,
    /// Use the Cholesky-family factorization instead of LU.
    pub cholmod: bool,
    /// Output directory, defaults to `<subject_dir>/brainprint`.
    pub outdir: Option<PathBuf>,
    /// Keep the temporary directory with the extracted surfaces.
    pub keep_temp: bool,
    /// Names of the structures to process, all if empty.
    pub structures: Vec<String>,
    /// Use the lumped mass matrix.
    pub lump: bool,
}


impl Default for BrainprintConfig {
    fn default() -> BrainprintConfig {
        BrainprintConfig {
            num: 50,
            evec: false,
            skip_cortex: false,
            norm: Norm::None,
            reweight: false,
            asymmetry: false,
            asymmetry_distance: DistanceKind::Euc,
            covariance: None,
            cholmod: false,
            outdir: None,
            keep_temp: false,
            structures: Vec::new(),
            lump: false,
        }
    }
}


impl BrainprintConfig {

    pub fn from_toml_str(s: &str) -> Result<BrainprintConfig> {
        Ok(toml::from_str(s)?)
    }

    /// Read a configuration from a TOML file.
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<BrainprintConfig> {
        let content = fs::read_to_string(path)?;
        BrainprintConfig::from_toml_str(&content)
    }

    /// Check the settings for consistency. Called once before any computation.
    ///
    /// # Errors
    ///
    /// `BrainprintError::InvalidConfig` describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.num < 1 {
            return Err(BrainprintError::InvalidConfig(String::from("num must be at least 1")));
        }
        if self.asymmetry {
            match (self.asymmetry_distance, &self.covariance) {
                (DistanceKind::Euc, _) => {},
                (DistanceKind::Mahalanobis, None) => {
                    return Err(BrainprintError::InvalidConfig(String::from("the mahalanobis distance needs a covariance matrix or reference samples")));
                },
                (DistanceKind::Robust, Some(CovarianceSource::Samples(_))) => {},
                (DistanceKind::Robust, _) => {
                    return Err(BrainprintError::InvalidConfig(String::from("the robust distance needs reference samples to estimate its covariance from")));
                },
                (DistanceKind::Mahalanobis, Some(_)) => {},
            }
        }
        if let Some(unknown) = self.structures.iter().find(|name| structure_by_name(name).is_none()) {
            return Err(BrainprintError::InvalidConfig(format!("unknown structure '{}'", unknown)));
        }
        if self.selected_structures().is_empty() {
            return Err(BrainprintError::InvalidConfig(String::from("no structures selected, all named structures are cortical but skip_cortex is set")));
        }
        Ok(())
    }

    /// The catalog structures this configuration processes, in catalog order.
    pub fn selected_structures(&self) -> Vec<&'static Structure> {
        select_structures(&self.structures, self.skip_cortex)
    }

    pub fn solver_kind(&self) -> SolverKind {
        SolverKind::from_cholmod_flag(self.cholmod)
    }
}
