use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::{error, info, warn};

use brainprint::{run_batch, BrainprintConfig, CovarianceSource, DistanceKind, Norm};

/// Compute BrainPrint shape descriptors (Laplace-Beltrami spectra) of the brain structures of FreeSurfer subjects.
#[derive(Parser, Debug)]
#[command(name = "brainprint", version, author, long_about = None)]
struct Args {
    /// FreeSurfer subjects directory
    #[arg(long)]
    sdir: PathBuf,

    /// Subject ID(s) within the subjects directory
    #[arg(long, required = true, num_args = 1..)]
    sid: Vec<String>,

    /// TOML configuration file, command line options override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of eigenvalues to compute
    #[arg(long)]
    num: Option<usize>,

    /// Also compute and write eigenvectors
    #[arg(long)]
    evec: bool,

    /// Skip the white and pial cortical surfaces
    #[arg(long = "skipcortex")]
    skip_cortex: bool,

    /// Eigenvalue normalization: surface, volume, geometry or none
    #[arg(long)]
    norm: Option<Norm>,

    /// Divide eigenvalue i by i + 1
    #[arg(long)]
    reweight: bool,

    /// Compute left/right asymmetry
    #[arg(long)]
    asymmetry: bool,

    /// Asymmetry distance: euc, mahalanobis or robust
    #[arg(long = "asym-distance")]
    asym_distance: Option<DistanceKind>,

    /// Covariance matrix (CSV) for the mahalanobis distance
    #[arg(long, conflicts_with = "covariance_samples")]
    covariance_matrix: Option<PathBuf>,

    /// Reference eigenvalue samples (CSV, one per row) to estimate the covariance from
    #[arg(long)]
    covariance_samples: Option<PathBuf>,

    /// Use the faster Cholesky-family factorization instead of LU
    #[arg(long)]
    cholmod: bool,

    /// Use the lumped mass matrix
    #[arg(long)]
    lump: bool,

    /// Only process these structures
    #[arg(long, num_args = 1..)]
    structures: Vec<String>,

    /// Output directory, defaults to <sdir>/<sid>/brainprint
    #[arg(long)]
    outdir: Option<PathBuf>,

    /// Keep the temporary directory with the extracted surfaces
    #[arg(long = "keep-temp")]
    keep_temp: bool,
}


/// The configuration file (or the defaults), overridden by the options given on the command line.
fn build_config(args: &Args) -> brainprint::Result<BrainprintConfig> {
    let mut config = match &args.config {
        Some(path) => BrainprintConfig::from_toml_file(path)?,
        None => BrainprintConfig::default(),
    };
    if let Some(num) = args.num { config.num = num; }
    if let Some(norm) = args.norm { config.norm = norm; }
    if let Some(distance) = args.asym_distance { config.asymmetry_distance = distance; }
    if let Some(path) = &args.covariance_matrix { config.covariance = Some(CovarianceSource::Matrix(path.clone())); }
    if let Some(path) = &args.covariance_samples { config.covariance = Some(CovarianceSource::Samples(path.clone())); }
    if args.outdir.is_some() { config.outdir = args.outdir.clone(); }
    if !args.structures.is_empty() { config.structures = args.structures.clone(); }
    config.evec |= args.evec;
    config.skip_cortex |= args.skip_cortex;
    config.reweight |= args.reweight;
    config.asymmetry |= args.asymmetry;
    config.cholmod |= args.cholmod;
    config.lump |= args.lump;
    config.keep_temp |= args.keep_temp;
    Ok(config)
}


fn main() -> ExitCode {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match build_config(&args) {
        Ok(c) => c,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        },
    };

    if config.outdir.is_some() && args.sid.len() > 1 {
        warn!("All {} subjects write into the same output directory.", args.sid.len());
    }

    let batch = match run_batch(&args.sdir, &args.sid, &config) {
        Ok(b) => b,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        },
    };

    for report in batch.reports.iter() {
        info!("Subject '{}': results in '{}', {} warnings.", report.subject_id, report.outputs.eigenvalues.display(), report.warnings.len());
    }
    for (subject_id, e) in batch.failures.iter() {
        error!("Subject '{}' failed: {}", subject_id, e);
    }

    if batch.all_succeeded() { ExitCode::SUCCESS } else { ExitCode::FAILURE }
}
