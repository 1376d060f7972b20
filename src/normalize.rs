//! Eigenvalue normalization and reweighting.
//!
//! Eigenvalues of the Laplace-Beltrami operator scale with the inverse squared size of a shape.
//! Normalization by area or volume removes this dependency, reweighting by the eigenvalue index
//! balances the influence of the higher eigenvalues, which grow roughly linearly with their index.

use serde::Deserialize;

use crate::traits::ShapeGeometry;


/// How eigenvalues are normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Norm {
    /// Multiply by the surface area.
    Surface,
    /// Multiply by the enclosed volume to the power of 2/3.
    Volume,
    /// Volume normalization for solid regions, surface normalization otherwise.
    Geometry,
    None,
}

impl Default for Norm {
    fn default() -> Norm {
        Norm::None
    }
}

impl std::str::FromStr for Norm {
    type Err = String;

    fn from_str(s: &str) -> Result<Norm, String> {
        match s {
            "surface" => Ok(Norm::Surface),
            "volume" => Ok(Norm::Volume),
            "geometry" => Ok(Norm::Geometry),
            "none" => Ok(Norm::None),
            other => Err(format!("unknown normalization '{}', expected one of surface, volume, geometry, none", other)),
        }
    }
}


/// Normalize eigenvalues by the geometry of the shape they were computed for.
///
/// # Examples
///
/// ```
/// use brainprint::{normalize, Norm, TriaMesh};
/// let sphere = TriaMesh::icosphere(3);
/// let normalized = normalize(&[0.0, 2.0], &sphere, Norm::Surface);
/// assert!((normalized[1] - 2.0 * sphere.area()).abs() < 1e-12);
/// ```
pub fn normalize<G: ShapeGeometry + ?Sized>(eigenvalues: &[f64], geometry: &G, norm: Norm) -> Vec<f64> {
    let factor = match norm {
        Norm::None => return eigenvalues.to_vec(),
        Norm::Surface => surface_factor(geometry),
        Norm::Volume => volume_factor(geometry),
        Norm::Geometry => {
            if geometry.is_solid() { volume_factor(geometry) } else { surface_factor(geometry) }
        },
    };
    eigenvalues.iter().map(|ev| ev * factor).collect()
}

/// Area to the power of 2/d for the surface dimension d = 2.
fn surface_factor<G: ShapeGeometry + ?Sized>(geometry: &G) -> f64 {
    geometry.area()
}

fn volume_factor<G: ShapeGeometry + ?Sized>(geometry: &G) -> f64 {
    geometry.volume().powf(2.0 / 3.0)
}


/// Divide the eigenvalue at index `i` by `i + 1`, the linear reweighting of Shape-DNA.
pub fn reweight(eigenvalues: &[f64]) -> Vec<f64> {
    reweight_with(eigenvalues, |i| (i + 1) as f64)
}


/// Divide the eigenvalue at index `i` by `weight(i)`.
pub fn reweight_with<F>(eigenvalues: &[f64], weight: F) -> Vec<f64>
where
    F: Fn(usize) -> f64,
{
    eigenvalues.iter().enumerate().map(|(i, ev)| ev / weight(i)).collect()
}
