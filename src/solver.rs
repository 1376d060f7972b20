//! Sparse direct solvers for the shifted operator of the eigenvalue problem.
//!
//! Two factorizations are available. The sparse LDLᵀ (Cholesky family) factorization from
//! `sprs-ldl` is fast and requires a symmetric matrix. The skyline LU factorization works
//! for general matrices with a symmetric nonzero pattern, it is slower and needs more memory.

use sprs::{CsMat, FillInReduction, SymmetryCheck};
use sprs_ldl::{Ldl, LdlNumeric};

use crate::error::{BrainprintError, Result};


/// A factorized square matrix `M` that can solve `M x = b`.
pub trait LinearSolver {
    /// Solve for one right hand side.
    fn solve(&self, rhs: &[f64]) -> Result<Vec<f64>>;

    /// The dimension of the matrix.
    fn dim(&self) -> usize;
}


/// The factorization strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverKind {
    Cholesky,
    Lu,
}

impl SolverKind {
    /// `Cholesky` if `cholmod` is set, `Lu` otherwise.
    pub fn from_cholmod_flag(cholmod: bool) -> SolverKind {
        if cholmod { SolverKind::Cholesky } else { SolverKind::Lu }
    }
}


/// Factorize a square sparse matrix with the given strategy.
pub fn factorize(kind: SolverKind, mat: &CsMat<f64>) -> Result<Box<dyn LinearSolver>> {
    if mat.rows() != mat.cols() {
        return Err(BrainprintError::Factorization(format!("matrix is not square: {} x {}", mat.rows(), mat.cols())));
    }
    match kind {
        SolverKind::Cholesky => Ok(Box::new(CholeskySolver::new(mat)?)),
        SolverKind::Lu => Ok(Box::new(SkylineLu::new(mat)?)),
    }
}


/// Sparse LDLᵀ factorization with a fill-in reducing ordering.
pub struct CholeskySolver {
    ldl: LdlNumeric<f64, usize>,
    dim: usize,
}

impl CholeskySolver {
    pub fn new(mat: &CsMat<f64>) -> Result<CholeskySolver> {
        let csc = mat.to_csc();
        let ldl = Ldl::new()
            .fill_in_reduction(FillInReduction::ReverseCuthillMcKee)
            .check_symmetry(SymmetryCheck::DontCheckSymmetry)
            .numeric(csc.view())
            .map_err(|e| BrainprintError::Factorization(format!("LDL factorization failed: {:?}", e)))?;
        Ok(CholeskySolver { ldl, dim: mat.rows() })
    }
}

impl LinearSolver for CholeskySolver {
    fn solve(&self, rhs: &[f64]) -> Result<Vec<f64>> {
        check_rhs(self.dim, rhs)?;
        let x: Vec<f64> = self.ldl.solve(rhs);
        if x.iter().any(|v| !v.is_finite()) {
            return Err(BrainprintError::Factorization(String::from("LDL solve produced non-finite values, the matrix is singular")));
        }
        Ok(x)
    }

    fn dim(&self) -> usize {
        self.dim
    }
}


/// LU factorization in skyline (variable band) storage, after a reverse Cuthill-McKee reordering
/// that keeps the band narrow. Pivoting is not performed.
///
/// Row `i` of `L` is stored from column `first[i]` to `i - 1` (unit diagonal implied), column `j` of
/// `U` from row `first[j]` to `j - 1`, and the diagonal of `U` separately. Fill-in stays within this envelope.
pub struct SkylineLu {
    /// `order[new] = old`
    order: Vec<usize>,
    first: Vec<usize>,
    lrow: Vec<Vec<f64>>,
    ucol: Vec<Vec<f64>>,
    diag: Vec<f64>,
}

impl SkylineLu {
    pub fn new(mat: &CsMat<f64>) -> Result<SkylineLu> {
        let n = mat.rows();
        let order: Vec<usize> = sprs::linalg::reverse_cuthill_mckee(mat.view()).perm.vec();
        let mut position = vec![0usize; n];
        for (new, &old) in order.iter().enumerate() {
            position[old] = new;
        }

        let entries = permuted_entries(mat, &position);

        let mut first: Vec<usize> = (0..n).collect();
        for &(r, c, _) in entries.iter() {
            let (lo, hi) = if r < c { (r, c) } else { (c, r) };
            first[hi] = first[hi].min(lo);
        }

        let mut lrow: Vec<Vec<f64>> = (0..n).map(|i| vec![0.0; i - first[i]]).collect();
        let mut ucol: Vec<Vec<f64>> = (0..n).map(|j| vec![0.0; j - first[j]]).collect();
        let mut diag = vec![0.0; n];
        let mut scale: f64 = 0.0;
        for &(r, c, value) in entries.iter() {
            scale = scale.max(value.abs());
            if r == c {
                diag[r] += value;
            } else if r > c {
                lrow[r][c - first[r]] += value;
            } else {
                ucol[c][r - first[c]] += value;
            }
        }
        let tiny = f64::EPSILON * scale.max(f64::MIN_POSITIVE);

        for j in 0..n {
            let fj = first[j];
            for i in fj..j {
                let fi = first[i];
                let s: f64 = (fi.max(fj)..i).map(|m| lrow[i][m - fi] * ucol[j][m - fj]).sum();
                ucol[j][i - fj] -= s;
            }
            for i in fj..j {
                let fi = first[i];
                let s: f64 = (fi.max(fj)..i).map(|m| lrow[j][m - fj] * ucol[i][m - fi]).sum();
                lrow[j][i - fj] = (lrow[j][i - fj] - s) / diag[i];
            }
            let s: f64 = (fj..j).map(|m| lrow[j][m - fj] * ucol[j][m - fj]).sum();
            diag[j] -= s;
            if diag[j].abs() <= tiny || !diag[j].is_finite() {
                return Err(BrainprintError::Factorization(format!("LU factorization hit a zero pivot in row {} of {}", j, n)));
            }
        }

        Ok(SkylineLu { order, first, lrow, ucol, diag })
    }

    /// Number of stored off-diagonal factor entries.
    pub fn envelope_size(&self) -> usize {
        self.lrow.iter().map(|r| r.len()).sum::<usize>() + self.ucol.iter().map(|c| c.len()).sum::<usize>()
    }
}

impl LinearSolver for SkylineLu {
    fn solve(&self, rhs: &[f64]) -> Result<Vec<f64>> {
        let n = self.dim();
        check_rhs(n, rhs)?;

        let mut y: Vec<f64> = self.order.iter().map(|&old| rhs[old]).collect();
        for i in 0..n {
            let fi = self.first[i];
            let s: f64 = (fi..i).map(|m| self.lrow[i][m - fi] * y[m]).sum();
            y[i] -= s;
        }
        for j in (0..n).rev() {
            y[j] /= self.diag[j];
            let fj = self.first[j];
            let xj = y[j];
            for i in fj..j {
                y[i] -= self.ucol[j][i - fj] * xj;
            }
        }

        let mut x = vec![0.0; n];
        for (new, &old) in self.order.iter().enumerate() {
            x[old] = y[new];
        }
        Ok(x)
    }

    fn dim(&self) -> usize {
        self.diag.len()
    }
}


/// All nonzero entries of the matrix as (row, col, value), with indices mapped through `position`.
fn permuted_entries(mat: &CsMat<f64>, position: &[usize]) -> Vec<(usize, usize, f64)> {
    let mut entries = Vec::with_capacity(mat.nnz());
    for (outer, vec) in mat.outer_iterator().enumerate() {
        for (inner, &value) in vec.iter() {
            let (r, c) = if mat.is_csr() { (outer, inner) } else { (inner, outer) };
            entries.push((position[r], position[c], value));
        }
    }
    entries
}

fn check_rhs(dim: usize, rhs: &[f64]) -> Result<()> {
    if rhs.len() != dim {
        return Err(BrainprintError::Factorization(format!("right hand side has length {}, expected {}", rhs.len(), dim)));
    }
    Ok(())
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::fem::{mul_vec, FemMatrices};
    use crate::mesh::TriaMesh;
    use approx::assert_abs_diff_eq;
    use sprs::TriMat;

    /// The 1D Laplacian with a positive shift, with rows and columns shuffled.
    fn shuffled_tridiagonal(n: usize) -> CsMat<f64> {
        let shuffle: Vec<usize> = (0..n).map(|i| (i * 7) % n).collect();
        let mut tri = TriMat::new((n, n));
        for i in 0..n {
            tri.add_triplet(shuffle[i], shuffle[i], 2.1);
            if i + 1 < n {
                tri.add_triplet(shuffle[i], shuffle[i + 1], -1.0);
                tri.add_triplet(shuffle[i + 1], shuffle[i], -1.0);
            }
        }
        tri.to_csr()
    }

    fn assert_solves(solver: &dyn LinearSolver, mat: &CsMat<f64>) {
        let b: Vec<f64> = (0..mat.rows()).map(|i| (i as f64 * 0.37).sin()).collect();
        let x = solver.solve(&b).unwrap();
        let r = mul_vec(mat, &x);
        for (ri, bi) in r.iter().zip(b.iter()) {
            assert_abs_diff_eq!(*bi, *ri, epsilon = 1e-9);
        }
    }

    #[test]
    fn both_factorizations_solve_a_banded_system() {
        let mat = shuffled_tridiagonal(30);
        for &kind in [SolverKind::Cholesky, SolverKind::Lu].iter() {
            let solver = factorize(kind, &mat).unwrap();
            assert_eq!(30, solver.dim());
            assert_solves(solver.as_ref(), &mat);
        }
    }

    #[test]
    fn reordering_keeps_the_skyline_narrow() {
        let lu = SkylineLu::new(&shuffled_tridiagonal(30)).unwrap();
        assert_eq!(2 * 29, lu.envelope_size());
    }

    #[test]
    fn both_factorizations_agree_on_a_mesh_operator() {
        let fem = FemMatrices::assemble(&TriaMesh::icosphere(2), false).unwrap();
        let shifted = fem.shifted(-0.01);
        let b: Vec<f64> = (0..fem.dim()).map(|i| 1.0 + (i % 5) as f64).collect();
        let x_chol = factorize(SolverKind::Cholesky, &shifted).unwrap().solve(&b).unwrap();
        let x_lu = factorize(SolverKind::Lu, &shifted).unwrap().solve(&b).unwrap();
        for (a, b) in x_chol.iter().zip(x_lu.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-8 * a.abs().max(1.0));
        }
        assert_solves(factorize(SolverKind::Lu, &shifted).unwrap().as_ref(), &shifted);
    }

    #[test]
    fn the_lu_factorization_rejects_singular_matrices() {
        let mut tri = TriMat::new((2, 2));
        tri.add_triplet(0, 0, 1.0);
        tri.add_triplet(0, 1, 2.0);
        tri.add_triplet(1, 0, 2.0);
        tri.add_triplet(1, 1, 4.0);
        let singular: CsMat<f64> = tri.to_csr();
        match SkylineLu::new(&singular) {
            Err(BrainprintError::Factorization(_)) => {},
            Err(e) => panic!("unexpected error {}", e),
            Ok(_) => panic!("expected a zero pivot"),
        }
    }

    #[test]
    fn wrong_right_hand_sides_are_rejected() {
        let solver = factorize(SolverKind::Lu, &shuffled_tridiagonal(5)).unwrap();
        assert!(solver.solve(&[1.0, 2.0]).is_err());
    }
}
