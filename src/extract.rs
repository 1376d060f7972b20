//! Iso-surface extraction from label volumes by marching tetrahedra.
//!
//! Every cube of 8 neighboring voxel centers is split into 6 tetrahedra sharing the
//! cube's main diagonal. The split is the same for every cube, so the faces of
//! neighboring cubes are triangulated alike and the extracted surface is watertight.

use std::collections::HashMap;

use ndarray::Array3;

use crate::error::{BrainprintError, Result};
use crate::mesh::{cross, dot, TriaMesh};

type GridPoint = [isize; 3];

/// Cube corner offsets.
const CORNERS: [GridPoint; 8] = [
    [0, 0, 0], [1, 0, 0], [1, 1, 0], [0, 1, 0],
    [0, 0, 1], [1, 0, 1], [1, 1, 1], [0, 1, 1],
];

/// The 6 tetrahedra of a cube, as indices into `CORNERS`. All contain corners 0 and 6.
const TETRAHEDRA: [[usize; 4]; 6] = [
    [0, 1, 2, 6], [0, 2, 3, 6], [0, 3, 7, 6],
    [0, 7, 4, 6], [0, 4, 5, 6], [0, 5, 1, 6],
];


/// Extracts the boundary surfaces of labeled regions from one segmentation volume.
#[derive(Debug, Clone)]
pub struct SurfaceExtractor<'a> {
    labels: &'a Array3<i32>,
    vox2ras: [[f64; 4]; 3],
}


/// Collects the triangles of one extraction. Vertices are created once per crossed grid edge.
struct MeshBuilder {
    vertex_of_edge: HashMap<(GridPoint, GridPoint), usize>,
    vertices: Vec<[f64; 3]>,
    triangles: Vec<[usize; 3]>,
}

impl MeshBuilder {
    fn new() -> MeshBuilder {
        MeshBuilder { vertex_of_edge: HashMap::new(), vertices: Vec::new(), triangles: Vec::new() }
    }

    fn edge_vertex(&mut self, a: GridPoint, b: GridPoint) -> usize {
        let key = if a < b { (a, b) } else { (b, a) };
        let vertices = &mut self.vertices;
        *self.vertex_of_edge.entry(key).or_insert_with(|| {
            // Binary inside/outside values cross level 0.5 halfway along the edge.
            vertices.push([
                (a[0] + b[0]) as f64 / 2.0,
                (a[1] + b[1]) as f64 / 2.0,
                (a[2] + b[2]) as f64 / 2.0,
            ]);
            vertices.len() - 1
        })
    }

    /// Add a triangle, flipped if needed so that its normal points along `outward`.
    fn add_triangle(&mut self, tri: [usize; 3], outward: &[f64; 3]) {
        let p0 = self.vertices[tri[0]];
        let p1 = self.vertices[tri[1]];
        let p2 = self.vertices[tri[2]];
        let e1 = [p1[0] - p0[0], p1[1] - p0[1], p1[2] - p0[2]];
        let e2 = [p2[0] - p0[0], p2[1] - p0[1], p2[2] - p0[2]];
        if dot(&cross(&e1, &e2), outward) < 0.0 {
            self.triangles.push([tri[0], tri[2], tri[1]]);
        } else {
            self.triangles.push(tri);
        }
    }

    /// Triangulate the iso-surface inside one tetrahedron.
    fn march_tetrahedron(&mut self, corners: &[GridPoint; 4], inside: &[bool; 4]) {
        let ins: Vec<GridPoint> = (0..4).filter(|&i| inside[i]).map(|i| corners[i]).collect();
        let outs: Vec<GridPoint> = (0..4).filter(|&i| !inside[i]).map(|i| corners[i]).collect();
        if ins.is_empty() || outs.is_empty() {
            return;
        }
        let outward = sub_centroids(&outs, &ins);

        match ins.len() {
            1 => {
                let a = self.edge_vertex(ins[0], outs[0]);
                let b = self.edge_vertex(ins[0], outs[1]);
                let c = self.edge_vertex(ins[0], outs[2]);
                self.add_triangle([a, b, c], &outward);
            },
            3 => {
                let a = self.edge_vertex(outs[0], ins[0]);
                let b = self.edge_vertex(outs[0], ins[1]);
                let c = self.edge_vertex(outs[0], ins[2]);
                self.add_triangle([a, b, c], &outward);
            },
            _ => {
                // Quad with corners on the edges ac, ad, bd, bc, in cyclic order.
                let (a, b, c, d) = (ins[0], ins[1], outs[0], outs[1]);
                let ac = self.edge_vertex(a, c);
                let ad = self.edge_vertex(a, d);
                let bd = self.edge_vertex(b, d);
                let bc = self.edge_vertex(b, c);
                self.add_triangle([ac, ad, bd], &outward);
                self.add_triangle([ac, bd, bc], &outward);
            },
        }
    }
}


/// Vector from the centroid of `from` to the centroid of `to`.
fn sub_centroids(to: &[GridPoint], from: &[GridPoint]) -> [f64; 3] {
    let centroid = |points: &[GridPoint]| {
        let mut c = [0.0; 3];
        for p in points.iter() {
            for k in 0..3 {
                c[k] += p[k] as f64 / points.len() as f64;
            }
        }
        c
    };
    let t = centroid(to);
    let f = centroid(from);
    [t[0] - f[0], t[1] - f[1], t[2] - f[2]]
}


impl<'a> SurfaceExtractor<'a> {

    /// Create an extractor for the given label volume. Vertices of extracted meshes are
    /// mapped from voxel indices to world coordinates by `vox2ras`, the upper 3 rows of an affine matrix.
    pub fn new(labels: &'a Array3<i32>, vox2ras: [[f64; 4]; 3]) -> SurfaceExtractor<'a> {
        SurfaceExtractor { labels, vox2ras }
    }

    /// Number of voxels carrying one of the labels.
    pub fn count_voxels(&self, label_set: &[i32]) -> usize {
        self.labels.iter().filter(|v| label_set.contains(v)).count()
    }

    fn is_inside(&self, p: GridPoint, label_set: &[i32]) -> bool {
        if p.iter().any(|&c| c < 0) {
            return false;
        }
        match self.labels.get((p[0] as usize, p[1] as usize, p[2] as usize)) {
            Some(v) => label_set.contains(v),
            None => false,
        }
    }

    /// Bounding box (min, max, inclusive) of all voxels carrying one of the labels.
    fn bounding_box(&self, label_set: &[i32]) -> Option<(GridPoint, GridPoint)> {
        let mut bbox: Option<(GridPoint, GridPoint)> = None;
        for ((i, j, k), v) in self.labels.indexed_iter() {
            if !label_set.contains(v) {
                continue;
            }
            let p = [i as isize, j as isize, k as isize];
            bbox = Some(match bbox {
                None => (p, p),
                Some((lo, hi)) => (
                    [lo[0].min(p[0]), lo[1].min(p[1]), lo[2].min(p[2])],
                    [hi[0].max(p[0]), hi[1].max(p[1]), hi[2].max(p[2])],
                ),
            });
        }
        bbox
    }

    /// Extract the surface of the region formed by all voxels carrying one of the labels.
    ///
    /// The returned mesh is the largest connected component of the iso-surface, in world
    /// coordinates, without free vertices and with outward facing triangles.
    ///
    /// # Errors
    ///
    /// `BrainprintError::EmptyLabel` if no voxel carries one of the labels.
    pub fn extract(&self, label_set: &[i32]) -> Result<TriaMesh> {
        let (lo, hi) = match self.bounding_box(label_set) {
            Some(bbox) => bbox,
            None => return Err(BrainprintError::EmptyLabel(label_set.to_vec())),
        };

        let mut builder = MeshBuilder::new();
        // Cubes with an origin one voxel before the box reach the voxels on its lower faces.
        for x in (lo[0] - 1)..=hi[0] {
            for y in (lo[1] - 1)..=hi[1] {
                for z in (lo[2] - 1)..=hi[2] {
                    let mut cube_points = [[0isize; 3]; 8];
                    let mut cube_inside = [false; 8];
                    for (c, offset) in CORNERS.iter().enumerate() {
                        cube_points[c] = [x + offset[0], y + offset[1], z + offset[2]];
                        cube_inside[c] = self.is_inside(cube_points[c], label_set);
                    }
                    if cube_inside.iter().all(|&b| b) || cube_inside.iter().all(|&b| !b) {
                        continue;
                    }
                    for tet in TETRAHEDRA.iter() {
                        let corners = [cube_points[tet[0]], cube_points[tet[1]], cube_points[tet[2]], cube_points[tet[3]]];
                        let inside = [cube_inside[tet[0]], cube_inside[tet[1]], cube_inside[tet[2]], cube_inside[tet[3]]];
                        builder.march_tetrahedron(&corners, &inside);
                    }
                }
            }
        }

        let mut mesh = TriaMesh::new(builder.vertices, builder.triangles)?;
        mesh.transform(&self.vox2ras);
        mesh.keep_largest_component();
        mesh.remove_free_vertices();
        // The transform may mirror the mesh, flip it back to outward facing.
        mesh.orient();
        Ok(mesh)
    }
}


#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    const IDENTITY: [[f64; 4]; 3] = [[1.0, 0.0, 0.0, 0.0], [0.0, 1.0, 0.0, 0.0], [0.0, 0.0, 1.0, 0.0]];

    fn ball(dim: usize, radius: f64, label: i32) -> Array3<i32> {
        let c = (dim as f64 - 1.0) / 2.0;
        Array3::from_shape_fn((dim, dim, dim), |(i, j, k)| {
            let d2 = (i as f64 - c).powi(2) + (j as f64 - c).powi(2) + (k as f64 - c).powi(2);
            if d2 <= radius * radius { label } else { 0 }
        })
    }

    #[test]
    fn a_single_voxel_gives_a_closed_outward_octahedron() {
        let mut labels = Array3::<i32>::zeros((3, 3, 3));
        labels[[1, 1, 1]] = 17;
        let mesh = SurfaceExtractor::new(&labels, IDENTITY).extract(&[17]).unwrap();

        assert!(mesh.is_closed());
        assert!(mesh.is_oriented());
        assert!(mesh.volume() > 0.0);
        // All vertices lie on edges to the 6 face neighbors or the two diagonal neighbors on the split axis.
        assert!(mesh.vertices.iter().all(|v| v.iter().all(|&c| c >= 0.5 && c <= 1.5)));
    }

    #[test]
    fn a_voxelized_ball_gives_a_closed_outward_surface() {
        let labels = ball(16, 5.0, 53);
        let mesh = SurfaceExtractor::new(&labels, IDENTITY).extract(&[53]).unwrap();

        assert!(mesh.is_closed());
        assert!(mesh.is_oriented());
        let (_, num_components) = mesh.vertex_components();
        assert_eq!(1, num_components);
        let sphere_volume = 4.0 / 3.0 * std::f64::consts::PI * 125.0;
        assert_relative_eq!(sphere_volume, mesh.volume(), max_relative = 0.25);
    }

    #[test]
    fn the_surface_stays_outward_under_a_mirroring_transform() {
        let labels = ball(12, 3.5, 10);
        let mut header = crate::fs_mgh::FsMghHeader::default();
        header.dim1len = 12;
        header.dim2len = 12;
        header.dim3len = 12;
        let vox2ras = header.vox2ras_tkr();
        let mesh = SurfaceExtractor::new(&labels, vox2ras).extract(&[10]).unwrap();

        assert!(mesh.is_closed());
        assert!(mesh.volume() > 0.0);
        assert!(mesh.area() > 0.0);
    }

    #[test]
    fn only_the_largest_component_is_kept() {
        let mut labels = Array3::<i32>::zeros((12, 8, 8));
        for i in 1..6 { for j in 1..6 { for k in 1..6 { labels[[i, j, k]] = 4; } } }
        labels[[9, 3, 3]] = 4;
        let mesh = SurfaceExtractor::new(&labels, IDENTITY).extract(&[4]).unwrap();

        assert!(mesh.is_closed());
        assert!(mesh.vertices.iter().all(|v| v[0] < 7.0));
        let (_, num_components) = mesh.vertex_components();
        assert_eq!(1, num_components);
    }

    #[test]
    fn voxels_at_the_volume_border_are_closed_off() {
        let labels = Array3::<i32>::from_elem((2, 2, 2), 7);
        let mesh = SurfaceExtractor::new(&labels, IDENTITY).extract(&[7]).unwrap();
        assert!(mesh.is_closed());
        assert!(mesh.volume() > 0.0);
    }

    #[test]
    fn label_sets_are_merged() {
        let mut labels = Array3::<i32>::zeros((8, 6, 6));
        for i in 1..4 { for j in 1..5 { for k in 1..5 { labels[[i, j, k]] = 11; } } }
        for i in 4..7 { for j in 1..5 { for k in 1..5 { labels[[i, j, k]] = 12; } } }
        let extractor = SurfaceExtractor::new(&labels, IDENTITY);

        assert_eq!(96, extractor.count_voxels(&[11, 12]));
        let merged = extractor.extract(&[11, 12]).unwrap();
        let single = extractor.extract(&[11]).unwrap();
        assert!(merged.volume() > 1.5 * single.volume());
    }

    #[test]
    fn a_missing_label_is_reported() {
        let labels = ball(8, 2.0, 17);
        match SurfaceExtractor::new(&labels, IDENTITY).extract(&[99, 100]) {
            Err(BrainprintError::EmptyLabel(l)) => assert_eq!(vec![99, 100], l),
            other => panic!("expected EmptyLabel, got {:?}", other),
        }
    }
}
