//! BrainPrint: shape descriptors of brain structures from their Laplace-Beltrami spectra.
//!
//! The surfaces of subcortical structures are extracted from a FreeSurfer segmentation (`mri/aseg.mgz`),
//! cortical surfaces are read from the subject's `surf/` directory. For every surface the smallest
//! eigenvalues of the Laplace-Beltrami operator are computed (the Shape-DNA), optionally normalized
//! and reweighted, and written as CSV tables. Distances between the spectra of left and right
//! homologous structures quantify lateral asymmetry.
//!
//! The FreeSurfer file readers and writers for surf and MGH/MGZ files are part of the public API.

pub mod asymmetry;
pub mod config;
pub mod error;
pub mod export;
pub mod extract;
pub mod fem;
pub mod fs_mgh;
pub mod fs_surface;
pub mod mesh;
pub mod normalize;
pub mod pipeline;
pub mod solver;
pub mod spectrum;
pub mod structures;
pub mod traits;
pub mod util;

pub use asymmetry::{AsymmetryAnalyzer, AsymmetryRecord, CovarianceSource, DistanceKind};
pub use config::BrainprintConfig;
pub use error::{BrainprintError, Result};
pub use extract::SurfaceExtractor;
pub use fem::FemMatrices;
pub use fs_mgh::{read_mgh, write_mgh, FsMgh, FsMghHeader};
pub use fs_surface::{read_surf, write_surf, FsSurface, FsSurfaceHeader};
pub use mesh::{read_vtk, TriaMesh};
pub use normalize::{normalize, reweight, reweight_with, Norm};
pub use pipeline::{run_batch, run_subject, BatchReport, ResultRow, RunWarning, Stage, SubjectReport};
pub use solver::{factorize, LinearSolver, SolverKind};
pub use spectrum::{Spectrum, SpectrumComputer};
pub use structures::{select_structures, structure_by_name, Laterality, Structure, StructureKind, StructureSource, STRUCTURES};
pub use traits::ShapeGeometry;
