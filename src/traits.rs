/// Scalar measures of a shape that spectra are normalized by.
pub trait ShapeGeometry {
    fn area(&self) -> f64;
    fn volume(&self) -> f64;

    /// Whether the shape is a solid region rather than a 2-manifold surface.
    fn is_solid(&self) -> bool {
        false
    }
}
