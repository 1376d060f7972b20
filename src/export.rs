//! CSV output of BrainPrint results.

use std::fs;
use std::path::{Path, PathBuf};

use csv::Writer;

use crate::asymmetry::AsymmetryRecord;
use crate::error::Result;
use crate::pipeline::ResultRow;


/// Files written for one subject.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OutputPaths {
    pub eigenvalues: PathBuf,
    pub eigenvectors: Vec<PathBuf>,
    pub asymmetry: Option<PathBuf>,
}


pub fn eigenvalue_table_path(destination: &Path, subject_id: &str) -> PathBuf {
    destination.join(format!("{}.brainprint.csv", subject_id))
}

pub fn eigenvector_table_path(destination: &Path, subject_id: &str, structure: &str) -> PathBuf {
    destination.join("eigenvectors").join(format!("{}.brainprint.evecs-{}.csv", subject_id, structure))
}

pub fn asymmetry_table_path(destination: &Path, subject_id: &str) -> PathBuf {
    destination.join(format!("{}.brainprint.asymmetry.csv", subject_id))
}


/// Write the eigenvalue table: one row per structure with its area, volume and `num` eigenvalues.
/// Rows with fewer eigenvalues are padded with `NaN`.
pub fn write_eigenvalue_table<P: AsRef<Path>>(path: P, rows: &[ResultRow], num: usize) -> Result<()> {
    let mut wtr = Writer::from_path(path)?;

    let mut header = vec![String::from("structure"), String::from("area"), String::from("volume")];
    header.extend((0..num).map(|i| format!("ev{}", i)));
    wtr.write_record(&header)?;

    for row in rows.iter() {
        let mut record = vec![row.structure.name.to_string(), row.area.to_string(), row.volume.to_string()];
        record.extend((0..num).map(|i| row.eigenvalues.get(i).map_or(String::from("NaN"), |v| v.to_string())));
        wtr.write_record(&record)?;
    }

    wtr.flush()?;
    Ok(())
}


/// Write the eigenvectors of one structure: one row per vertex, one column per eigenvector.
pub fn write_eigenvector_table<P: AsRef<Path>>(path: P, row: &ResultRow) -> Result<()> {
    let evecs = match &row.eigenvectors {
        Some(e) => e,
        None => return Ok(()),
    };
    let mut wtr = Writer::from_path(path)?;

    let mut header = vec![String::from("vertex")];
    header.extend((0..evecs.ncols()).map(|i| format!("ev{}", i)));
    wtr.write_record(&header)?;

    for (vertex, values) in evecs.outer_iter().enumerate() {
        let mut record = vec![vertex.to_string()];
        record.extend(values.iter().map(|v| v.to_string()));
        wtr.write_record(&record)?;
    }

    wtr.flush()?;
    Ok(())
}


/// Write the asymmetry table: one row per left/right pair.
pub fn write_asymmetry_table<P: AsRef<Path>>(path: P, records: &[AsymmetryRecord]) -> Result<()> {
    let mut wtr = Writer::from_path(path)?;
    wtr.write_record(&["pair", "distance"])?;
    for record in records.iter() {
        wtr.write_record(&[record.pair_name(), record.distance.to_string()])?;
    }
    wtr.flush()?;
    Ok(())
}


/// Write all result tables of one subject into `destination`.
pub fn export_results(destination: &Path, subject_id: &str, rows: &[ResultRow], num: usize, asymmetry: Option<&[AsymmetryRecord]>) -> Result<OutputPaths> {
    let mut outputs = OutputPaths { eigenvalues: eigenvalue_table_path(destination, subject_id), ..OutputPaths::default() };
    write_eigenvalue_table(&outputs.eigenvalues, rows, num)?;

    let with_evecs: Vec<&ResultRow> = rows.iter().filter(|r| r.eigenvectors.is_some()).collect();
    if !with_evecs.is_empty() {
        fs::create_dir_all(destination.join("eigenvectors"))?;
        for row in with_evecs {
            let path = eigenvector_table_path(destination, subject_id, row.structure.name);
            write_eigenvector_table(&path, row)?;
            outputs.eigenvectors.push(path);
        }
    }

    if let Some(records) = asymmetry {
        let path = asymmetry_table_path(destination, subject_id);
        write_asymmetry_table(&path, records)?;
        outputs.asymmetry = Some(path);
    }
    Ok(outputs)
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::structures::structure_by_name;
    use ndarray::array;
    use tempfile::tempdir;

    fn rows() -> Vec<ResultRow> {
        vec![
            ResultRow {
                structure: structure_by_name("Left-Hippocampus").unwrap(),
                area: 10.5,
                volume: 3.25,
                eigenvalues: vec![0.0, 0.5, 1.5],
                eigenvectors: Some(array![[1.0, 0.5], [1.0, -0.5]]),
            },
            ResultRow {
                structure: structure_by_name("Right-Hippocampus").unwrap(),
                area: 11.0,
                volume: 3.5,
                eigenvalues: vec![0.0, 0.75],
                eigenvectors: None,
            },
        ]
    }

    #[test]
    fn the_eigenvalue_table_is_padded_with_nan() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s1.brainprint.csv");
        write_eigenvalue_table(&path, &rows(), 3).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!("structure,area,volume,ev0,ev1,ev2", lines[0]);
        assert_eq!("Left-Hippocampus,10.5,3.25,0,0.5,1.5", lines[1]);
        assert_eq!("Right-Hippocampus,11,3.5,0,0.75,NaN", lines[2]);
    }

    #[test]
    fn all_tables_are_written() {
        let dir = tempdir().unwrap();
        let records = vec![AsymmetryRecord { left: "Left-Hippocampus", right: "Right-Hippocampus", distance: 0.25, truncated_to: Some(2) }];
        let outputs = export_results(dir.path(), "s1", &rows(), 3, Some(&records)).unwrap();

        assert_eq!(dir.path().join("s1.brainprint.csv"), outputs.eigenvalues);
        assert_eq!(vec![dir.path().join("eigenvectors").join("s1.brainprint.evecs-Left-Hippocampus.csv")], outputs.eigenvectors);
        let evecs = fs::read_to_string(&outputs.eigenvectors[0]).unwrap();
        assert_eq!("vertex,ev0,ev1\n0,1,0.5\n1,1,-0.5\n", evecs);

        let asym = fs::read_to_string(outputs.asymmetry.unwrap()).unwrap();
        assert_eq!("pair,distance\nLeft-Hippocampus_Right-Hippocampus,0.25\n", asym);
    }

    #[test]
    fn no_optional_tables_without_data() {
        let dir = tempdir().unwrap();
        let mut rows = rows();
        rows[0].eigenvectors = None;
        let outputs = export_results(dir.path(), "s2", &rows, 2, None).unwrap();
        assert!(outputs.eigenvectors.is_empty());
        assert!(outputs.asymmetry.is_none());
        assert!(!dir.path().join("eigenvectors").exists());
    }
}
