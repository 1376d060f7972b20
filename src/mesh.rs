//! Triangle meshes: geometric measures, topology cleanup and VTK import/export.
//!
//! A [`TriaMesh`] stores vertex coordinates and triangles as index triples into the
//! vertices. Meshes extracted from a segmentation or read from a FreeSurfer surf file
//! end up here before their spectrum is computed.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::{BrainprintError, Result};
use crate::traits::ShapeGeometry;


/// A triangle mesh.
#[derive(Debug, Clone, PartialEq)]
pub struct TriaMesh {
    pub vertices: Vec<[f64; 3]>,
    pub triangles: Vec<[usize; 3]>,
}


fn sub(a: &[f64; 3], b: &[f64; 3]) -> [f64; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

pub(crate) fn cross(a: &[f64; 3], b: &[f64; 3]) -> [f64; 3] {
    [a[1] * b[2] - a[2] * b[1], a[2] * b[0] - a[0] * b[2], a[0] * b[1] - a[1] * b[0]]
}

pub(crate) fn dot(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn norm(a: &[f64; 3]) -> f64 {
    dot(a, a).sqrt()
}

fn edge_key(a: usize, b: usize) -> (usize, usize) {
    if a < b { (a, b) } else { (b, a) }
}


impl TriaMesh {

    /// Create a mesh, checking that all triangle indices are valid vertex indices.
    pub fn new(vertices: Vec<[f64; 3]>, triangles: Vec<[usize; 3]>) -> Result<TriaMesh> {
        let num_vertices = vertices.len();
        if let Some(bad) = triangles.iter().flat_map(|t| t.iter()).find(|&&idx| idx >= num_vertices) {
            return Err(BrainprintError::DegenerateMesh(format!("triangle references vertex {} but mesh has {} vertices", bad, num_vertices)));
        }
        Ok(TriaMesh { vertices, triangles })
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    pub fn num_triangles(&self) -> usize {
        self.triangles.len()
    }

    /// The area of every triangle, in mesh order.
    pub fn triangle_areas(&self) -> Vec<f64> {
        self.triangles.iter().map(|t| {
            let v0 = &self.vertices[t[0]];
            let e1 = sub(&self.vertices[t[1]], v0);
            let e2 = sub(&self.vertices[t[2]], v0);
            0.5 * norm(&cross(&e1, &e2))
        }).collect()
    }

    /// Total surface area.
    pub fn area(&self) -> f64 {
        self.triangle_areas().iter().sum()
    }

    /// Signed enclosed volume, positive for outward oriented closed meshes. Open meshes have volume `0.0`.
    pub fn volume(&self) -> f64 {
        if !self.is_closed() {
            return 0.0;
        }
        self.signed_volume()
    }

    fn signed_volume(&self) -> f64 {
        self.triangles.iter().map(|t| {
            let v0 = &self.vertices[t[0]];
            let v1 = &self.vertices[t[1]];
            let v2 = &self.vertices[t[2]];
            dot(v0, &cross(v1, v2))
        }).sum::<f64>() / 6.0
    }

    fn undirected_edge_counts(&self) -> HashMap<(usize, usize), usize> {
        let mut counts = HashMap::with_capacity(self.triangles.len() * 3 / 2);
        for t in self.triangles.iter() {
            for k in 0..3 {
                *counts.entry(edge_key(t[k], t[(k + 1) % 3])).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Whether every edge is shared by exactly two triangles, i.e., the mesh has no boundary.
    pub fn is_closed(&self) -> bool {
        !self.triangles.is_empty() && self.undirected_edge_counts().values().all(|&c| c == 2)
    }

    /// Whether neighboring triangles are consistently oriented, i.e., no directed edge occurs twice.
    pub fn is_oriented(&self) -> bool {
        let mut seen = std::collections::HashSet::with_capacity(self.triangles.len() * 3);
        for t in self.triangles.iter() {
            for k in 0..3 {
                if !seen.insert((t[k], t[(k + 1) % 3])) {
                    return false;
                }
            }
        }
        true
    }

    /// Re-orient triangles consistently within each connected component. Closed meshes
    /// are additionally flipped to face outward. Returns the number of flipped triangles.
    pub fn orient(&mut self) -> usize {
        let mut edge_tris: HashMap<(usize, usize), Vec<usize>> = HashMap::with_capacity(self.triangles.len() * 3 / 2);
        for (t_idx, t) in self.triangles.iter().enumerate() {
            for k in 0..3 {
                edge_tris.entry(edge_key(t[k], t[(k + 1) % 3])).or_default().push(t_idx);
            }
        }

        let mut flipped = 0;
        let mut visited = vec![false; self.triangles.len()];
        let mut queue: VecDeque<usize> = VecDeque::new();
        for seed in 0..self.triangles.len() {
            if visited[seed] {
                continue;
            }
            visited[seed] = true;
            queue.push_back(seed);
            while let Some(t_idx) = queue.pop_front() {
                let t = self.triangles[t_idx];
                for k in 0..3 {
                    let (a, b) = (t[k], t[(k + 1) % 3]);
                    for &nb in edge_tris[&edge_key(a, b)].iter() {
                        if visited[nb] {
                            continue;
                        }
                        // A consistent neighbor traverses the shared edge as b -> a.
                        let n = self.triangles[nb];
                        if (0..3).any(|j| n[j] == a && n[(j + 1) % 3] == b) {
                            self.triangles[nb] = [n[0], n[2], n[1]];
                            flipped += 1;
                        }
                        visited[nb] = true;
                        queue.push_back(nb);
                    }
                }
            }
        }

        if self.is_closed() && self.signed_volume() < 0.0 {
            self.flip();
            flipped = self.triangles.len() - flipped;
        }
        flipped
    }

    /// Reverse the orientation of all triangles.
    pub fn flip(&mut self) {
        for t in self.triangles.iter_mut() {
            t.swap(1, 2);
        }
    }

    /// Connected component index for every vertex, and the number of components. Free vertices form their own component.
    pub fn vertex_components(&self) -> (Vec<usize>, usize) {
        let n = self.vertices.len();
        let mut parent: Vec<usize> = (0..n).collect();

        fn find(parent: &mut Vec<usize>, mut x: usize) -> usize {
            while parent[x] != x {
                parent[x] = parent[parent[x]];
                x = parent[x];
            }
            x
        }

        for t in self.triangles.iter() {
            for k in 0..2 {
                let ra = find(&mut parent, t[k]);
                let rb = find(&mut parent, t[k + 1]);
                if ra != rb {
                    parent[ra.max(rb)] = ra.min(rb);
                }
            }
        }

        let mut component_of_root: HashMap<usize, usize> = HashMap::new();
        let mut components = Vec::with_capacity(n);
        for v in 0..n {
            let root = find(&mut parent, v);
            let next = component_of_root.len();
            components.push(*component_of_root.entry(root).or_insert(next));
        }
        let num = component_of_root.len();
        (components, num)
    }

    /// Drop all triangles that are not part of the connected component with the most vertices.
    /// Returns the number of removed triangles.
    pub fn keep_largest_component(&mut self) -> usize {
        let (components, num) = self.vertex_components();
        if num <= 1 {
            return 0;
        }
        let mut sizes = vec![0usize; num];
        for &c in components.iter() {
            sizes[c] += 1;
        }
        // Ties go to the first component found.
        let mut largest = 0;
        for (c, &size) in sizes.iter().enumerate() {
            if size > sizes[largest] {
                largest = c;
            }
        }
        let before = self.triangles.len();
        self.triangles.retain(|t| components[t[0]] == largest);
        before - self.triangles.len()
    }

    /// Remove vertices not referenced by any triangle, re-indexing the triangles. Returns the number of removed vertices.
    pub fn remove_free_vertices(&mut self) -> usize {
        let mut used = vec![false; self.vertices.len()];
        for t in self.triangles.iter() {
            for &v in t.iter() {
                used[v] = true;
            }
        }
        let mut new_index = vec![usize::MAX; self.vertices.len()];
        let mut kept: Vec<[f64; 3]> = Vec::with_capacity(self.vertices.len());
        for (old, v) in self.vertices.iter().enumerate() {
            if used[old] {
                new_index[old] = kept.len();
                kept.push(*v);
            }
        }
        let removed = self.vertices.len() - kept.len();
        for t in self.triangles.iter_mut() {
            for v in t.iter_mut() {
                *v = new_index[*v];
            }
        }
        self.vertices = kept;
        removed
    }

    /// Apply an affine transform, given as the upper 3 rows of a 4x4 matrix, to all vertices.
    pub fn transform(&mut self, affine: &[[f64; 4]; 3]) {
        for v in self.vertices.iter_mut() {
            let p = *v;
            for (r, row) in affine.iter().enumerate() {
                v[r] = row[0] * p[0] + row[1] * p[1] + row[2] * p[2] + row[3];
            }
        }
    }

    /// A copy of this mesh with all coordinates multiplied by `factor`.
    pub fn scaled(&self, factor: f64) -> TriaMesh {
        TriaMesh {
            vertices: self.vertices.iter().map(|v| [v[0] * factor, v[1] * factor, v[2] * factor]).collect(),
            triangles: self.triangles.clone(),
        }
    }

    /// A unit sphere approximated by a subdivided icosahedron, outward oriented.
    ///
    /// Level 0 has 12 vertices, every further level roughly quadruples the triangle count.
    ///
    /// # Examples
    ///
    /// ```
    /// let sphere = brainprint::TriaMesh::icosphere(2);
    /// assert_eq!(162, sphere.num_vertices());
    /// assert!(sphere.is_closed());
    /// ```
    pub fn icosphere(level: usize) -> TriaMesh {
        let t = (1.0 + 5.0_f64.sqrt()) / 2.0;
        let mut vertices: Vec<[f64; 3]> = vec![
            [-1.0, t, 0.0], [1.0, t, 0.0], [-1.0, -t, 0.0], [1.0, -t, 0.0],
            [0.0, -1.0, t], [0.0, 1.0, t], [0.0, -1.0, -t], [0.0, 1.0, -t],
            [t, 0.0, -1.0], [t, 0.0, 1.0], [-t, 0.0, -1.0], [-t, 0.0, 1.0],
        ];
        let mut triangles: Vec<[usize; 3]> = vec![
            [0, 11, 5], [0, 5, 1], [0, 1, 7], [0, 7, 10], [0, 10, 11],
            [1, 5, 9], [5, 11, 4], [11, 10, 2], [10, 7, 6], [7, 1, 8],
            [3, 9, 4], [3, 4, 2], [3, 2, 6], [3, 6, 8], [3, 8, 9],
            [4, 9, 5], [2, 4, 11], [6, 2, 10], [8, 6, 7], [9, 8, 1],
        ];

        for _ in 0..level {
            let mut midpoints: HashMap<(usize, usize), usize> = HashMap::new();
            let mut midpoint = |a: usize, b: usize, vertices: &mut Vec<[f64; 3]>| -> usize {
                *midpoints.entry(edge_key(a, b)).or_insert_with(|| {
                    let (va, vb) = (vertices[a], vertices[b]);
                    vertices.push([(va[0] + vb[0]) / 2.0, (va[1] + vb[1]) / 2.0, (va[2] + vb[2]) / 2.0]);
                    vertices.len() - 1
                })
            };
            let mut refined = Vec::with_capacity(triangles.len() * 4);
            for tri in triangles.iter() {
                let ab = midpoint(tri[0], tri[1], &mut vertices);
                let bc = midpoint(tri[1], tri[2], &mut vertices);
                let ca = midpoint(tri[2], tri[0], &mut vertices);
                refined.push([tri[0], ab, ca]);
                refined.push([tri[1], bc, ab]);
                refined.push([tri[2], ca, bc]);
                refined.push([ab, bc, ca]);
            }
            triangles = refined;
        }

        for v in vertices.iter_mut() {
            let len = norm(v);
            for c in v.iter_mut() {
                *c /= len;
            }
        }

        let mut mesh = TriaMesh { vertices, triangles };
        mesh.orient();
        mesh
    }

    /// Write the mesh as a legacy ASCII VTK polydata file.
    pub fn write_vtk<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        writeln!(out, "# vtk DataFile Version 1.0")?;
        writeln!(out, "vtk output")?;
        writeln!(out, "ASCII")?;
        writeln!(out, "DATASET POLYDATA")?;
        writeln!(out, "POINTS {} float", self.vertices.len())?;
        for v in self.vertices.iter() {
            writeln!(out, "{} {} {}", v[0], v[1], v[2])?;
        }
        writeln!(out, "POLYGONS {} {}", self.triangles.len(), self.triangles.len() * 4)?;
        for t in self.triangles.iter() {
            writeln!(out, "3 {} {} {}", t[0], t[1], t[2])?;
        }
        out.flush()?;
        Ok(())
    }
}


impl ShapeGeometry for TriaMesh {
    fn area(&self) -> f64 {
        TriaMesh::area(self)
    }

    fn volume(&self) -> f64 {
        TriaMesh::volume(self)
    }
}


impl fmt::Display for TriaMesh {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Triangle mesh with {} vertices and {} triangles.", self.vertices.len(), self.triangles.len())
    }
}


fn vtk_error(msg: &str) -> BrainprintError {
    BrainprintError::InvalidVtkFormat(msg.to_string())
}

fn next_number<'a, T, I>(tokens: &mut I, what: &str) -> Result<T>
where
    T: std::str::FromStr,
    I: Iterator<Item = &'a str>,
{
    tokens.next()
        .and_then(|tok| tok.parse::<T>().ok())
        .ok_or_else(|| vtk_error(&format!("expected {}", what)))
}


/// Read a triangle mesh from a legacy ASCII VTK polydata file, as written by [`TriaMesh::write_vtk`].
///
/// Only triangle `POLYGONS` are supported. Runs do not read surfaces back, this is for loading the
/// surfaces kept with `keep_temp` in other tools and analyses.
pub fn read_vtk<P: AsRef<Path>>(path: P) -> Result<TriaMesh> {
    let content = std::fs::read_to_string(path)?;
    let mut lines = content.lines().map(str::trim).filter(|l| !l.is_empty() && !l.starts_with('#'));

    if !lines.by_ref().take(5).any(|l| l.starts_with("ASCII")) {
        return Err(vtk_error("ASCII keyword not found"));
    }
    if !lines.next().map(|l| l.starts_with("DATASET POLYDATA")).unwrap_or(false) {
        return Err(vtk_error("expected DATASET POLYDATA"));
    }

    let mut tokens = lines.flat_map(str::split_whitespace);
    if tokens.next() != Some("POINTS") {
        return Err(vtk_error("expected POINTS"));
    }
    let num_points: usize = next_number(&mut tokens, "number of points")?;
    match tokens.next() {
        Some("float") | Some("double") => {},
        _ => return Err(vtk_error("expected float or double point type")),
    }
    let mut vertices = Vec::with_capacity(num_points);
    for _ in 0..num_points {
        vertices.push([
            next_number(&mut tokens, "x coordinate")?,
            next_number(&mut tokens, "y coordinate")?,
            next_number(&mut tokens, "z coordinate")?,
        ]);
    }

    if tokens.next() != Some("POLYGONS") {
        return Err(vtk_error("expected POLYGONS"));
    }
    let num_polygons: usize = next_number(&mut tokens, "number of polygons")?;
    let num_values: usize = next_number(&mut tokens, "polygon value count")?;
    if num_values != num_polygons * 4 {
        return Err(vtk_error("can only read triangles"));
    }
    let mut triangles = Vec::with_capacity(num_polygons);
    for _ in 0..num_polygons {
        let corners: usize = next_number(&mut tokens, "polygon size")?;
        if corners != 3 {
            return Err(vtk_error("can only read triangles"));
        }
        triangles.push([
            next_number(&mut tokens, "vertex index")?,
            next_number(&mut tokens, "vertex index")?,
            next_number(&mut tokens, "vertex index")?,
        ]);
    }

    TriaMesh::new(vertices, triangles)
}


#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;
    use tempfile::tempdir;

    fn tetrahedron() -> TriaMesh {
        TriaMesh::new(
            vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            vec![[0, 2, 1], [0, 1, 3], [1, 2, 3], [0, 3, 2]],
        ).unwrap()
    }

    #[test]
    fn tetrahedron_measures_are_correct() {
        let tet = tetrahedron();
        assert!(tet.is_closed());
        assert!(tet.is_oriented());
        assert_abs_diff_eq!(1.0 / 6.0, tet.volume(), epsilon = 1e-12);
        let expected_area = 1.5 + 3.0_f64.sqrt() / 2.0;
        assert_abs_diff_eq!(expected_area, tet.area(), epsilon = 1e-12);
    }

    #[test]
    fn invalid_triangle_indices_are_rejected() {
        let res = TriaMesh::new(vec![[0.0, 0.0, 0.0]], vec![[0, 1, 2]]);
        assert!(res.is_err());
    }

    #[test]
    fn icosphere_approximates_the_unit_sphere() {
        let sphere = TriaMesh::icosphere(3);
        assert_eq!(642, sphere.num_vertices());
        assert_eq!(1280, sphere.num_triangles());
        assert!(sphere.is_closed());
        assert!(sphere.is_oriented());
        assert_abs_diff_eq!(4.0 * std::f64::consts::PI, sphere.area(), epsilon = 0.1);
        assert_abs_diff_eq!(4.0 / 3.0 * std::f64::consts::PI, sphere.volume(), epsilon = 0.1);
    }

    #[test]
    fn orient_repairs_flipped_triangles_and_faces_outward() {
        let mut tet = tetrahedron();
        tet.triangles[2] = [1, 3, 2];
        assert!(!tet.is_oriented());
        tet.orient();
        assert!(tet.is_oriented());
        assert!(tet.volume() > 0.0);

        let mut inward = tetrahedron();
        inward.flip();
        assert!(inward.volume() < 0.0);
        assert_eq!(4, inward.orient());
        assert!(inward.volume() > 0.0);
    }

    #[test]
    fn open_meshes_have_no_volume() {
        let mut tet = tetrahedron();
        tet.triangles.pop();
        assert!(!tet.is_closed());
        assert_eq!(0.0, tet.volume());
    }

    #[test]
    fn only_the_largest_component_is_kept() {
        let small = tetrahedron();
        let mut big = TriaMesh::icosphere(1).scaled(5.0);
        let offset = big.vertices.len();
        big.vertices.extend(small.vertices.iter().map(|v| [v[0] + 20.0, v[1], v[2]]));
        big.triangles.extend(small.triangles.iter().map(|t| [t[0] + offset, t[1] + offset, t[2] + offset]));
        assert_eq!(2, big.vertex_components().1);

        assert_eq!(4, big.keep_largest_component());
        assert_eq!(4, big.remove_free_vertices());
        assert_eq!(42, big.num_vertices());
        assert!(big.is_closed());
    }

    #[test]
    fn transform_applies_the_affine() {
        let mut tet = tetrahedron();
        tet.transform(&[[2.0, 0.0, 0.0, 1.0], [0.0, 2.0, 0.0, 0.0], [0.0, 0.0, 2.0, -1.0]]);
        assert_eq!([3.0, 0.0, -1.0], tet.vertices[1]);
        assert_abs_diff_eq!(8.0 / 6.0, tet.volume(), epsilon = 1e-12);
    }

    #[test]
    fn vtk_files_can_be_written_and_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sphere.vtk");
        let sphere = TriaMesh::icosphere(1);
        sphere.write_vtk(&path).unwrap();

        let back = read_vtk(&path).unwrap();
        assert_eq!(sphere.triangles, back.triangles);
        assert_eq!(sphere.num_vertices(), back.num_vertices());
        assert_abs_diff_eq!(sphere.area(), back.area(), epsilon = 1e-9);
    }

    #[test]
    fn vtk_files_with_quads_are_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("quad.vtk");
        std::fs::write(&path, "# vtk DataFile Version 1.0\nvtk output\nASCII\nDATASET POLYDATA\nPOINTS 4 float\n0 0 0\n1 0 0\n1 1 0\n0 1 0\nPOLYGONS 1 5\n4 0 1 2 3\n").unwrap();
        assert!(read_vtk(&path).is_err());
    }
}
