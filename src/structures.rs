//! The catalog of brain structures a BrainPrint is computed for.
//!
//! Subcortical structures are built from one or more FreeSurfer aseg labels, combined
//! labels are merged into a single region before surface extraction. Cortical structures
//! are the white and pial surfaces of both hemispheres, read from the subject's `surf/` directory.

use std::fmt;


#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Laterality {
    Left,
    Right,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StructureKind {
    CorticalSurface,
    SubcorticalSurface,
    /// A solid region, normalized by its volume in `geometry` mode. The built-in catalog has no such
    /// entry, the kind is for callers describing their own structures.
    Volume,
}

/// Where the mesh of a structure comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructureSource {
    /// The boundary surface of the union of these aseg labels, from `mri/aseg.mgz`.
    Aseg(&'static [i32]),
    /// A FreeSurfer surf file in the subject's `surf/` directory.
    Surface(&'static str),
}

/// One anatomical region. Instances are static catalog entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Structure {
    /// Unique catalog identifier, result rows are ordered by it.
    pub id: u32,
    pub name: &'static str,
    pub laterality: Laterality,
    pub kind: StructureKind,
    pub source: StructureSource,
}

impl Structure {

    /// The structure name without its hemisphere prefix, shared by the two sides of a homologous pair.
    ///
    /// # Examples
    ///
    /// ```
    /// let hippo = brainprint::structure_by_name("Right-Hippocampus").unwrap();
    /// assert_eq!("Hippocampus", hippo.bilateral_name());
    /// ```
    pub fn bilateral_name(&self) -> &'static str {
        for prefix in ["Left-", "Right-", "lh-", "rh-"].iter() {
            if let Some(rest) = self.name.strip_prefix(prefix) {
                return rest;
            }
        }
        self.name
    }

    pub fn is_cortical(&self) -> bool {
        self.kind == StructureKind::CorticalSurface
    }
}

impl fmt::Display for Structure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}


const fn aseg(id: u32, name: &'static str, laterality: Laterality, labels: &'static [i32]) -> Structure {
    Structure { id, name, laterality, kind: StructureKind::SubcorticalSurface, source: StructureSource::Aseg(labels) }
}

const fn cortex(id: u32, name: &'static str, laterality: Laterality, file: &'static str) -> Structure {
    Structure { id, name, laterality, kind: StructureKind::CorticalSurface, source: StructureSource::Surface(file) }
}


/// All structures of a BrainPrint, in output order.
pub static STRUCTURES: [Structure; 34] = [
    aseg(1, "CorpusCallosum", Laterality::None, &[251, 252, 253, 254, 255]),
    aseg(2, "Cerebellum", Laterality::None, &[7, 8, 16, 46, 47]),
    aseg(3, "Ventricles", Laterality::None, &[4, 5, 14, 24, 31, 43, 44, 63]),
    aseg(4, "3rd-Ventricle", Laterality::None, &[14, 24]),
    aseg(5, "4th-Ventricle", Laterality::None, &[15]),
    aseg(6, "Brain-Stem", Laterality::None, &[16]),
    aseg(7, "Left-Striatum", Laterality::Left, &[11, 12, 26]),
    aseg(8, "Left-Lateral-Ventricle", Laterality::Left, &[4, 5, 31]),
    aseg(9, "Left-Cerebellum-White-Matter", Laterality::Left, &[7]),
    aseg(10, "Left-Cerebellum-Cortex", Laterality::Left, &[8]),
    aseg(11, "Left-Thalamus-Proper", Laterality::Left, &[10]),
    aseg(12, "Left-Caudate", Laterality::Left, &[11]),
    aseg(13, "Left-Putamen", Laterality::Left, &[12]),
    aseg(14, "Left-Pallidum", Laterality::Left, &[13]),
    aseg(15, "Left-Hippocampus", Laterality::Left, &[17]),
    aseg(16, "Left-Amygdala", Laterality::Left, &[18]),
    aseg(17, "Left-Accumbens-area", Laterality::Left, &[26]),
    aseg(18, "Left-VentralDC", Laterality::Left, &[28]),
    aseg(19, "Right-Striatum", Laterality::Right, &[50, 51, 58]),
    aseg(20, "Right-Lateral-Ventricle", Laterality::Right, &[43, 44, 63]),
    aseg(21, "Right-Cerebellum-White-Matter", Laterality::Right, &[46]),
    aseg(22, "Right-Cerebellum-Cortex", Laterality::Right, &[47]),
    aseg(23, "Right-Thalamus-Proper", Laterality::Right, &[49]),
    aseg(24, "Right-Caudate", Laterality::Right, &[50]),
    aseg(25, "Right-Putamen", Laterality::Right, &[51]),
    aseg(26, "Right-Pallidum", Laterality::Right, &[52]),
    aseg(27, "Right-Hippocampus", Laterality::Right, &[53]),
    aseg(28, "Right-Amygdala", Laterality::Right, &[54]),
    aseg(29, "Right-Accumbens-area", Laterality::Right, &[58]),
    aseg(30, "Right-VentralDC", Laterality::Right, &[60]),
    cortex(31, "lh-white-2d", Laterality::Left, "lh.white"),
    cortex(32, "lh-pial-2d", Laterality::Left, "lh.pial"),
    cortex(33, "rh-white-2d", Laterality::Right, "rh.white"),
    cortex(34, "rh-pial-2d", Laterality::Right, "rh.pial"),
];


/// Look up a catalog structure by its name.
pub fn structure_by_name(name: &str) -> Option<&'static Structure> {
    STRUCTURES.iter().find(|s| s.name == name)
}


/// The structures to process: all catalog entries, or only the named ones if `names` is not empty.
/// Cortical surfaces are left out if `skip_cortex` is set. Unknown names are ignored here, they are
/// rejected when the configuration is validated.
pub fn select_structures(names: &[String], skip_cortex: bool) -> Vec<&'static Structure> {
    STRUCTURES.iter()
        .filter(|s| names.is_empty() || names.iter().any(|n| n == s.name))
        .filter(|s| !(skip_cortex && s.is_cortical()))
        .collect()
}
