//! Linear finite element discretization of the Laplace-Beltrami operator on triangle meshes.
//!
//! The operator becomes the generalized eigenvalue problem `A x = λ B x`, with the symmetric
//! positive semi-definite stiffness matrix `A` (cotangent weights) and the symmetric positive
//! definite mass matrix `B`. Closed meshes need no boundary condition, open meshes get the
//! Neumann condition.

use sprs::{CsMat, TriMat};

use crate::error::{BrainprintError, Result};
use crate::mesh::{cross, dot, TriaMesh};


/// Stiffness and mass matrix of a mesh, both in CSR format.
#[derive(Debug, Clone)]
pub struct FemMatrices {
    pub stiffness: CsMat<f64>,
    pub mass: CsMat<f64>,
}


impl FemMatrices {

    /// Assemble the matrices for a mesh. With `lump`, the mass of every triangle is put
    /// onto the diagonal (one third per corner) instead of the consistent mass matrix.
    ///
    /// # Errors
    ///
    /// `BrainprintError::DegenerateMesh` if the mesh has no triangles or all triangles have zero area.
    pub fn assemble(mesh: &TriaMesh, lump: bool) -> Result<FemMatrices> {
        let n = mesh.num_vertices();
        if mesh.triangles.is_empty() {
            return Err(BrainprintError::DegenerateMesh(String::from("mesh has no triangles")));
        }

        // 4 times the area of every triangle.
        let mut vol: Vec<f64> = Vec::with_capacity(mesh.num_triangles());
        let mut edges: Vec<[[f64; 3]; 3]> = Vec::with_capacity(mesh.num_triangles());
        for t in mesh.triangles.iter() {
            let v1 = mesh.vertices[t[0]];
            let v2 = mesh.vertices[t[1]];
            let v3 = mesh.vertices[t[2]];
            let v2mv1 = [v2[0] - v1[0], v2[1] - v1[1], v2[2] - v1[2]];
            let v3mv2 = [v3[0] - v2[0], v3[1] - v2[1], v3[2] - v2[2]];
            let v1mv3 = [v1[0] - v3[0], v1[1] - v3[1], v1[2] - v3[2]];
            let cr = cross(&v3mv2, &v1mv3);
            vol.push(2.0 * dot(&cr, &cr).sqrt());
            edges.push([v2mv1, v3mv2, v1mv3]);
        }

        let mean_vol = vol.iter().sum::<f64>() / vol.len() as f64;
        if mean_vol <= 0.0 || !mean_vol.is_finite() {
            return Err(BrainprintError::DegenerateMesh(String::from("all triangles have zero area")));
        }
        // Zero areas would divide by zero below.
        let small_vol = 0.0001 * mean_vol;
        for v in vol.iter_mut() {
            if *v < f64::EPSILON {
                *v = small_vol;
            }
        }

        let mut a = TriMat::with_capacity((n, n), 9 * mesh.num_triangles());
        let mut b = TriMat::with_capacity((n, n), 9 * mesh.num_triangles());
        for ((t, e), &vol) in mesh.triangles.iter().zip(edges.iter()).zip(vol.iter()) {
            let [v2mv1, v3mv2, v1mv3] = e;
            let a12 = dot(v3mv2, v1mv3) / vol;
            let a23 = dot(v1mv3, v2mv1) / vol;
            let a31 = dot(v2mv1, v3mv2) / vol;
            let (t1, t2, t3) = (t[0], t[1], t[2]);

            for &(i, j, value) in [(t1, t2, a12), (t2, t3, a23), (t3, t1, a31)].iter() {
                a.add_triplet(i, j, value);
                a.add_triplet(j, i, value);
            }
            // Rows sum to zero.
            a.add_triplet(t1, t1, -a12 - a31);
            a.add_triplet(t2, t2, -a12 - a23);
            a.add_triplet(t3, t3, -a31 - a23);

            if lump {
                for &i in t.iter() {
                    b.add_triplet(i, i, vol / 12.0);
                }
            } else {
                for &(i, j) in [(t1, t2), (t2, t3), (t3, t1)].iter() {
                    b.add_triplet(i, j, vol / 48.0);
                    b.add_triplet(j, i, vol / 48.0);
                }
                for &i in t.iter() {
                    b.add_triplet(i, i, vol / 24.0);
                }
            }
        }

        Ok(FemMatrices { stiffness: a.to_csr(), mass: b.to_csr() })
    }

    /// Number of rows (and columns) of the matrices, the number of mesh vertices.
    pub fn dim(&self) -> usize {
        self.stiffness.rows()
    }

    /// The shifted operator `A - sigma * B`.
    pub fn shifted(&self, sigma: f64) -> CsMat<f64> {
        let n = self.dim();
        let mut tri = TriMat::with_capacity((n, n), self.stiffness.nnz() + self.mass.nnz());
        for (row, vec) in self.stiffness.outer_iterator().enumerate() {
            for (col, &value) in vec.iter() {
                tri.add_triplet(row, col, value);
            }
        }
        for (row, vec) in self.mass.outer_iterator().enumerate() {
            for (col, &value) in vec.iter() {
                tri.add_triplet(row, col, -sigma * value);
            }
        }
        tri.to_csr()
    }
}


/// Sparse matrix times dense vector, `y = m * x`.
pub fn mul_vec(m: &CsMat<f64>, x: &[f64]) -> Vec<f64> {
    let mut y = vec![0.0; m.rows()];
    if m.is_csr() {
        for (row, vec) in m.outer_iterator().enumerate() {
            y[row] = vec.iter().map(|(col, &value)| value * x[col]).sum();
        }
    } else {
        for (col, vec) in m.outer_iterator().enumerate() {
            for (row, &value) in vec.iter() {
                y[row] += value * x[col];
            }
        }
    }
    y
}


/// The maximum absolute row sum of a sparse matrix.
pub fn norm_inf(m: &CsMat<f64>) -> f64 {
    let mut row_sums = vec![0.0; m.rows()];
    for (outer, vec) in m.outer_iterator().enumerate() {
        for (inner, &value) in vec.iter() {
            let row = if m.is_csr() { outer } else { inner };
            row_sums[row] += value.abs();
        }
    }
    row_sums.into_iter().fold(0.0, f64::max)
}


#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn single_triangle() -> TriaMesh {
        TriaMesh::new(vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]], vec![[0, 1, 2]]).unwrap()
    }

    fn dense(m: &CsMat<f64>) -> Vec<Vec<f64>> {
        let mut d = vec![vec![0.0; m.cols()]; m.rows()];
        for (row, vec) in m.outer_iterator().enumerate() {
            for (col, &value) in vec.iter() {
                d[row][col] += value;
            }
        }
        d
    }

    #[test]
    fn the_stiffness_of_a_right_triangle_has_cotangent_weights() {
        let fem = FemMatrices::assemble(&single_triangle(), false).unwrap();
        let a = dense(&fem.stiffness);

        // The right angle is at vertex 0, so the edge 1-2 gets weight -cot(90°)/2 = 0.
        assert_abs_diff_eq!(0.0, a[1][2], epsilon = 1e-12);
        assert_abs_diff_eq!(-0.5, a[0][1], epsilon = 1e-12);
        assert_abs_diff_eq!(-0.5, a[0][2], epsilon = 1e-12);
        assert_abs_diff_eq!(1.0, a[0][0], epsilon = 1e-12);
        assert_abs_diff_eq!(0.5, a[1][1], epsilon = 1e-12);
    }

    #[test]
    fn the_mass_matrix_sums_to_the_area() {
        let sphere = TriaMesh::icosphere(2);
        for &lump in [false, true].iter() {
            let fem = FemMatrices::assemble(&sphere, lump).unwrap();
            let total: f64 = fem.mass.data().iter().sum();
            assert_abs_diff_eq!(sphere.area(), total, epsilon = 1e-9);
        }
        let lumped = FemMatrices::assemble(&sphere, true).unwrap();
        assert_eq!(sphere.num_vertices(), lumped.mass.nnz());
    }

    #[test]
    fn constant_functions_are_in_the_kernel() {
        let sphere = TriaMesh::icosphere(2).scaled(3.0);
        let fem = FemMatrices::assemble(&sphere, false).unwrap();
        let ones = vec![1.0; fem.dim()];
        for v in mul_vec(&fem.stiffness, &ones) {
            assert_abs_diff_eq!(0.0, v, epsilon = 1e-10);
        }
    }

    #[test]
    fn the_shifted_operator_combines_both_matrices() {
        let fem = FemMatrices::assemble(&single_triangle(), false).unwrap();
        let shifted = dense(&fem.shifted(-0.01));
        let a = dense(&fem.stiffness);
        let b = dense(&fem.mass);
        for i in 0..3 {
            for j in 0..3 {
                assert_abs_diff_eq!(a[i][j] + 0.01 * b[i][j], shifted[i][j], epsilon = 1e-12);
            }
        }
        assert_abs_diff_eq!(2.0, norm_inf(&fem.stiffness), epsilon = 1e-12);
    }

    #[test]
    fn degenerate_triangles_get_a_small_area() {
        let mesh = TriaMesh::new(
            vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [2.0, 0.0, 0.0]],
            vec![[0, 1, 2], [0, 1, 3]],
        ).unwrap();
        let fem = FemMatrices::assemble(&mesh, true).unwrap();
        assert!(fem.mass.data().iter().all(|v| v.is_finite() && *v > 0.0));
        assert!(fem.stiffness.data().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn meshes_without_area_are_rejected() {
        let mesh = TriaMesh::new(vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [2.0, 0.0, 0.0]], vec![[0, 1, 2]]).unwrap();
        assert!(FemMatrices::assemble(&mesh, false).is_err());
    }
}
