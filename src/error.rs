use quick_error::quick_error;
use std::io::Error as IOError;
use std::path::PathBuf;

quick_error! {
    /// Error type for all error variants originated by this crate.
    #[derive(Debug)]
    pub enum BrainprintError {
        /// Invalid surf file: wrong magic number.
        InvalidFsSurfaceFormat {
            display("Invalid FreeSurfer surf file")
        }

        /// Invalid MGH file: unsupported format version.
        InvalidFsMghFormat {
            display("Invalid FreeSurfer MGH file")
        }

        /// The MGH data type code is not one of MRI_UCHAR, MRI_INT, MRI_FLOAT, MRI_SHORT.
        UnsupportedMghDatatype(code: i32) {
            display("Unsupported MGH data type code {}", code)
        }

        InvalidVtkFormat(msg: String) {
            display("Invalid VTK file: {}", msg)
        }

        /// The mesh cannot be used for the requested operation.
        DegenerateMesh(msg: String) {
            display("Degenerate mesh: {}", msg)
        }

        /// None of the given labels occurs in the segmentation volume.
        EmptyLabel(labels: Vec<i32>) {
            display("No voxels carry label(s) {:?}", labels)
        }

        Factorization(msg: String) {
            display("Factorization of the shifted operator failed: {}", msg)
        }

        NoConvergence(requested: usize, converged: usize, iterations: usize) {
            display("Eigensolver did not converge: {} of {} eigenpairs after {} iterations", converged, requested, iterations)
        }

        Covariance(msg: String) {
            display("Invalid covariance input: {}", msg)
        }

        InvalidConfig(msg: String) {
            display("Invalid configuration: {}", msg)
        }

        MissingSubjectDirectory(path: PathBuf) {
            display("FreeSurfer results directory at {} does not exist", path.display())
        }

        NoStructuresProcessed(subject_id: String) {
            display("No structure could be processed for subject {}", subject_id)
        }

        /// I/O Error
        Io(err: IOError) {
            from()
            source(err)
            display("I/O error: {}", err)
        }

        Csv(err: csv::Error) {
            from()
            source(err)
            display("CSV error: {}", err)
        }

        Toml(err: toml::de::Error) {
            from()
            source(err)
            display("Cannot parse configuration file: {}", err)
        }
    }
}

/// Alias type for results originated from this crate.
pub type Result<T> = ::std::result::Result<T, BrainprintError>;
