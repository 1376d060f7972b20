//! Per-subject and batch BrainPrint runs.
//!
//! A subject run reads the subject's FreeSurfer results, computes the spectrum of every selected
//! structure and writes the result tables. Problems with single structures are logged and
//! recorded as warnings, the run continues with the other structures. Problems with the
//! subject as a whole end its run with an error, a batch then continues with the next subject.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use ndarray::{Array2, Array3};

use crate::asymmetry::{AsymmetryAnalyzer, AsymmetryRecord};
use crate::config::BrainprintConfig;
use crate::error::{BrainprintError, Result};
use crate::export::{export_results, OutputPaths};
use crate::extract::SurfaceExtractor;
use crate::fs_mgh::read_mgh;
use crate::fs_surface::read_surf;
use crate::mesh::TriaMesh;
use crate::normalize::{normalize, reweight};
use crate::spectrum::SpectrumComputer;
use crate::structures::{Structure, StructureKind, StructureSource};
use crate::traits::ShapeGeometry;
use crate::util::join_labels;


/// The result for one structure of one subject.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow {
    pub structure: &'static Structure,
    pub area: f64,
    pub volume: f64,
    /// Normalized and optionally reweighted eigenvalues.
    pub eigenvalues: Vec<f64>,
    pub eigenvectors: Option<Array2<f64>>,
}


/// The step of a run a warning originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Extract,
    ReadSurface,
    WriteSurface,
    Spectrum,
    Asymmetry,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Stage::Extract => "surface extraction",
            Stage::ReadSurface => "surface reading",
            Stage::WriteSurface => "surface export",
            Stage::Spectrum => "spectrum computation",
            Stage::Asymmetry => "asymmetry analysis",
        };
        write!(f, "{}", name)
    }
}


/// A recoverable problem of a subject run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunWarning {
    /// The affected structure, `None` for subject-wide steps.
    pub structure: Option<&'static str>,
    pub stage: Stage,
    pub message: String,
}


/// Everything a successful subject run produced.
#[derive(Debug, Clone)]
pub struct SubjectReport {
    pub subject_id: String,
    pub destination: PathBuf,
    /// Sorted by structure id.
    pub rows: Vec<ResultRow>,
    /// `None` if asymmetry was not requested or could not be computed.
    pub asymmetry: Option<Vec<AsymmetryRecord>>,
    pub warnings: Vec<RunWarning>,
    pub outputs: OutputPaths,
    /// The kept temporary directory, if `keep_temp` was set.
    pub temp_dir: Option<PathBuf>,
}


/// Reports of all subjects of a batch that succeeded, and the errors of all that failed.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub reports: Vec<SubjectReport>,
    pub failures: Vec<(String, BrainprintError)>,
}

impl BatchReport {
    pub fn all_succeeded(&self) -> bool {
        self.failures.is_empty()
    }
}


/// The geometry a spectrum is normalized by: the mesh, treated as solid for volume structures.
struct StructureGeometry<'a> {
    mesh: &'a TriaMesh,
    solid: bool,
}

impl<'a> ShapeGeometry for StructureGeometry<'a> {
    fn area(&self) -> f64 {
        self.mesh.area()
    }

    fn volume(&self) -> f64 {
        self.mesh.volume()
    }

    fn is_solid(&self) -> bool {
        self.solid
    }
}


/// The aseg label volume and its voxel-to-surface-RAS transform.
struct Segmentation {
    labels: Array3<i32>,
    vox2ras: [[f64; 4]; 3],
}

fn read_segmentation(subject_dir: &Path) -> Result<Segmentation> {
    let mgh = read_mgh(subject_dir.join("mri").join("aseg.mgz"))?;
    let labels = mgh.frame_labels(0)?;
    Ok(Segmentation { labels, vox2ras: mgh.header.vox2ras_tkr() })
}


/// Run BrainPrint for one subject, `<subjects_dir>/<subject_id>`, after validating the configuration.
///
/// # Errors
///
/// Invalid configurations, a missing subject directory, an unreadable segmentation, a run in which no
/// structure could be processed, and failures to write the result tables.
pub fn run_subject(subjects_dir: &Path, subject_id: &str, config: &BrainprintConfig) -> Result<SubjectReport> {
    config.validate()?;
    process_subject(subjects_dir, subject_id, config)
}


/// Run BrainPrint for several subjects. The configuration is validated once, before any subject is
/// processed. A failing subject is logged and recorded, the batch continues with the next one.
pub fn run_batch(subjects_dir: &Path, subject_ids: &[String], config: &BrainprintConfig) -> Result<BatchReport> {
    config.validate()?;
    let mut batch = BatchReport::default();
    for subject_id in subject_ids.iter() {
        match process_subject(subjects_dir, subject_id, config) {
            Ok(report) => batch.reports.push(report),
            Err(e) => {
                log::error!("Subject '{}' failed: {}", subject_id, e);
                batch.failures.push((subject_id.clone(), e));
            },
        }
    }
    log::info!("Processed {} subjects, {} failed.", subject_ids.len(), batch.failures.len());
    Ok(batch)
}


fn process_subject(subjects_dir: &Path, subject_id: &str, config: &BrainprintConfig) -> Result<SubjectReport> {
    let subject_dir = subjects_dir.join(subject_id);
    if !subject_dir.is_dir() {
        return Err(BrainprintError::MissingSubjectDirectory(subject_dir));
    }
    let destination = match &config.outdir {
        Some(outdir) => outdir.clone(),
        None => subject_dir.join("brainprint"),
    };
    fs::create_dir_all(&destination)?;

    // Removed when dropped, also on early returns and panics.
    let temp = tempfile::Builder::new().prefix("temp").tempdir_in(&destination)?;
    let surface_dir = temp.path().join("surfaces");
    fs::create_dir_all(&surface_dir)?;

    let structures = config.selected_structures();
    let segmentation = if structures.iter().any(|s| matches!(s.source, StructureSource::Aseg(_))) {
        Some(read_segmentation(&subject_dir)?)
    } else {
        None
    };

    let computer = SpectrumComputer {
        lump: config.lump,
        solver: config.solver_kind(),
        eigenvectors: config.evec,
        ..SpectrumComputer::new(config.num)
    };

    let mut rows = Vec::with_capacity(structures.len());
    let mut warnings = Vec::new();
    for structure in structures {
        log::info!("Subject '{}': processing structure '{}'.", subject_id, structure.name);
        let outcome = structure_mesh(structure, &subject_dir, segmentation.as_ref(), &surface_dir, &mut warnings)
            .and_then(|mesh| compute_row(structure, &mesh, &computer, config).map_err(|e| (Stage::Spectrum, e)));
        match outcome {
            Ok(row) => rows.push(row),
            Err((stage, e)) => {
                log::warn!("Subject '{}': skipping structure '{}', {} failed: {}", subject_id, structure.name, stage, e);
                warnings.push(RunWarning { structure: Some(structure.name), stage, message: e.to_string() });
            },
        }
    }

    if rows.is_empty() {
        return Err(BrainprintError::NoStructuresProcessed(subject_id.to_string()));
    }
    rows.sort_by_key(|r| r.structure.id);

    let asymmetry = if config.asymmetry {
        let records = AsymmetryAnalyzer::new(config.asymmetry_distance, config.covariance.as_ref())
            .and_then(|analyzer| analyzer.analyze(subject_id, &rows));
        match records {
            Ok(records) => Some(records),
            Err(e) => {
                log::warn!("Subject '{}': {} failed, no asymmetry table written: {}", subject_id, Stage::Asymmetry, e);
                warnings.push(RunWarning { structure: None, stage: Stage::Asymmetry, message: e.to_string() });
                None
            },
        }
    } else {
        None
    };

    let outputs = export_results(&destination, subject_id, &rows, config.num, asymmetry.as_deref())?;
    log::info!("Subject '{}': wrote {} structures to '{}'.", subject_id, rows.len(), outputs.eigenvalues.display());

    let temp_dir = if config.keep_temp {
        let kept = temp.keep();
        log::info!("Subject '{}': keeping temporary files in '{}'.", subject_id, kept.display());
        Some(kept)
    } else {
        None
    };

    Ok(SubjectReport {
        subject_id: subject_id.to_string(),
        destination,
        rows,
        asymmetry,
        warnings,
        outputs,
        temp_dir,
    })
}


/// The mesh of one structure, extracted from the segmentation or read from a surf file. The mesh is also
/// written as VTK into `surface_dir`, a failure to do so is only a warning.
fn structure_mesh(
    structure: &'static Structure,
    subject_dir: &Path,
    segmentation: Option<&Segmentation>,
    surface_dir: &Path,
    warnings: &mut Vec<RunWarning>,
) -> std::result::Result<TriaMesh, (Stage, BrainprintError)> {
    let (mesh, vtk_name) = match structure.source {
        StructureSource::Aseg(labels) => {
            let seg = segmentation.ok_or_else(|| (Stage::Extract, BrainprintError::EmptyLabel(labels.to_vec())))?;
            let mesh = SurfaceExtractor::new(&seg.labels, seg.vox2ras)
                .extract(labels)
                .map_err(|e| (Stage::Extract, e))?;
            (mesh, format!("aseg.final.{}.vtk", join_labels(labels)))
        },
        StructureSource::Surface(file) => {
            let mut mesh = read_surf(subject_dir.join("surf").join(file))
                .map_err(|e| (Stage::ReadSurface, e))?
                .mesh;
            if !mesh.is_oriented() {
                mesh.orient();
            }
            (mesh, format!("{}.vtk", file))
        },
    };

    if let Err(e) = mesh.write_vtk(surface_dir.join(&vtk_name)) {
        log::warn!("Could not write surface of structure '{}' to '{}': {}", structure.name, vtk_name, e);
        warnings.push(RunWarning { structure: Some(structure.name), stage: Stage::WriteSurface, message: e.to_string() });
    }
    Ok(mesh)
}


fn compute_row(structure: &'static Structure, mesh: &TriaMesh, computer: &SpectrumComputer, config: &BrainprintConfig) -> Result<ResultRow> {
    let spectrum = computer.compute(mesh)?;
    let geometry = StructureGeometry { mesh, solid: structure.kind == StructureKind::Volume };
    let mut eigenvalues = normalize(&spectrum.eigenvalues, &geometry, config.norm);
    if config.reweight {
        eigenvalues = reweight(&eigenvalues);
    }
    Ok(ResultRow {
        structure,
        area: mesh.area(),
        volume: mesh.volume(),
        eigenvalues,
        eigenvectors: spectrum.eigenvectors,
    })
}
