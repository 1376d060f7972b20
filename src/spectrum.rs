//! Laplace-Beltrami spectra (Shape-DNA) of triangle meshes.
//!
//! The smallest eigenvalues of `A x = λ B x` are found by thick-restart block Lanczos on the
//! shift-invert operator `(A - σB)⁻¹ B`. The Krylov basis is kept `B`-orthonormal by full
//! reorthogonalization, Ritz pairs of `(A, B)` are extracted by Rayleigh-Ritz projection onto the
//! basis. Expanding a whole block per step resolves repeated eigenvalues, which are common on
//! symmetric shapes (a sphere has multiplicities 1, 3, 5, ...).

use std::cmp::Ordering;

use nalgebra::{DMatrix, DVector, SymmetricEigen};
use ndarray::Array2;
use sprs::CsMat;

use crate::error::{BrainprintError, Result};
use crate::fem::{mul_vec, norm_inf, FemMatrices};
use crate::mesh::TriaMesh;
use crate::solver::{factorize, LinearSolver, SolverKind};

/// The shift of the shift-invert transform. Slightly negative, so that `A - σB` is positive definite.
pub const DEFAULT_SHIFT: f64 = -0.01;

/// Width of a Lanczos block.
const BLOCK_SIZE: usize = 8;

/// Squared `B`-norm, relative to the block before projection, below which a direction is considered dependent.
const DEPENDENCE_TOLERANCE: f64 = 1e-14;


/// Eigenvalues in ascending order, and optionally the matching eigenvectors.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    pub eigenvalues: Vec<f64>,
    /// One row per mesh vertex, one column per eigenvalue. The vectors are `B`-orthonormal.
    pub eigenvectors: Option<Array2<f64>>,
}


impl Spectrum {
    pub fn len(&self) -> usize {
        self.eigenvalues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.eigenvalues.is_empty()
    }
}


/// Settings for spectrum computation.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectrumComputer {
    /// Number of eigenvalues to compute, including the first (zero) one.
    pub num: usize,
    /// Use the lumped (diagonal) mass matrix.
    pub lump: bool,
    /// Factorization of the shifted operator.
    pub solver: SolverKind,
    /// Whether to return eigenvectors.
    pub eigenvectors: bool,
    pub shift: f64,
    /// Relative residual tolerance.
    pub tolerance: f64,
    /// Maximum number of restart cycles.
    pub max_iterations: usize,
}


impl Default for SpectrumComputer {
    fn default() -> SpectrumComputer {
        SpectrumComputer {
            num: 50,
            lump: false,
            solver: SolverKind::Lu,
            eigenvectors: false,
            shift: DEFAULT_SHIFT,
            tolerance: 1e-8,
            max_iterations: 300,
        }
    }
}


/// Deterministic pseudo random numbers for start blocks.
struct Lcg {
    state: u64,
}

impl Lcg {
    fn new(seed: u64) -> Lcg {
        Lcg { state: seed }
    }

    /// Uniform in [-0.5, 0.5].
    fn next_f64(&mut self) -> f64 {
        self.state = self.state.wrapping_mul(6364136223846793005).wrapping_add(1);
        ((self.state >> 33) as f64) / (u32::MAX as f64) - 0.5
    }

    fn block(&mut self, rows: usize, cols: usize) -> DMatrix<f64> {
        DMatrix::from_fn(rows, cols, |_, _| self.next_f64())
    }
}


/// The column `j` of a dense matrix as a slice.
fn column(x: &DMatrix<f64>, j: usize) -> &[f64] {
    let n = x.nrows();
    &x.as_slice()[j * n..(j + 1) * n]
}

/// `m * x` for a sparse `m` and every column of a dense block `x`.
fn sparse_mul_block(m: &CsMat<f64>, x: &DMatrix<f64>) -> DMatrix<f64> {
    let mut y = DMatrix::zeros(m.rows(), x.ncols());
    for j in 0..x.ncols() {
        y.column_mut(j).copy_from_slice(&mul_vec(m, column(x, j)));
    }
    y
}

/// `(A - σB)⁻¹ B x` for every column of `x`.
fn apply_operator(solver: &dyn LinearSolver, mass: &CsMat<f64>, x: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    let bx = sparse_mul_block(mass, x);
    let mut y = DMatrix::zeros(x.nrows(), x.ncols());
    for j in 0..x.ncols() {
        y.column_mut(j).copy_from_slice(&solver.solve(column(&bx, j))?);
    }
    Ok(y)
}

/// `Vᵀ M V`, one sparse product per column of `V`.
fn projected(m: &CsMat<f64>, v: &DMatrix<f64>) -> DMatrix<f64> {
    let mut h = DMatrix::zeros(v.ncols(), v.ncols());
    for j in 0..v.ncols() {
        let mv = DVector::from_vec(mul_vec(m, column(v, j)));
        h.set_column(j, &v.tr_mul(&mv));
    }
    symmetrized(h)
}

fn symmetrized(m: DMatrix<f64>) -> DMatrix<f64> {
    (&m + m.transpose()) * 0.5
}

/// Indices of `values` sorted ascending, equal values keep their index order.
fn ascending_order(values: &[f64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].partial_cmp(&values[b]).unwrap_or(Ordering::Equal).then(a.cmp(&b)));
    order
}


/// `B`-orthonormalize the columns of `w` against the first `cols` columns of `basis` and among
/// themselves, in two passes. Dependent directions are dropped, so the result may have fewer
/// columns than `w`, or none.
fn b_orthonormalize(basis: &DMatrix<f64>, cols: usize, mut w: DMatrix<f64>, mass: &CsMat<f64>) -> DMatrix<f64> {
    for _ in 0..2 {
        let scale = sparse_mul_block(mass, &w).component_mul(&w).row_sum().iter().cloned().fold(0.0, f64::max);
        if scale.is_nan() || scale <= 0.0 {
            return DMatrix::zeros(w.nrows(), 0);
        }
        if cols > 0 {
            let v = basis.columns(0, cols);
            let coefficients = v.tr_mul(&sparse_mul_block(mass, &w));
            w -= &v * &coefficients;
        }

        let gram = SymmetricEigen::new(symmetrized(w.tr_mul(&sparse_mul_block(mass, &w))));
        let keep: Vec<usize> = (0..gram.eigenvalues.len())
            .filter(|&i| gram.eigenvalues[i] > scale * DEPENDENCE_TOLERANCE)
            .collect();
        if keep.is_empty() {
            return DMatrix::zeros(w.nrows(), 0);
        }
        let q = DMatrix::from_fn(w.ncols(), keep.len(), |i, c| {
            gram.eigenvectors[(i, keep[c])] / gram.eigenvalues[keep[c]].sqrt()
        });
        w = &w * q;
    }
    w
}


/// Next block of the Krylov basis: `front` orthonormalized against the basis, replaced by random
/// directions if the basis already contains it.
fn next_block(basis: &DMatrix<f64>, cols: usize, front: DMatrix<f64>, mass: &CsMat<f64>, rng: &mut Lcg) -> DMatrix<f64> {
    let n = basis.nrows();
    let width = front.ncols().max(1);
    let block = b_orthonormalize(basis, cols, front, mass);
    if block.ncols() > 0 || cols >= n {
        return block;
    }
    b_orthonormalize(basis, cols, rng.block(n, width), mass)
}


impl SpectrumComputer {

    /// Settings for `num` eigenvalues, all others at their defaults.
    pub fn new(num: usize) -> SpectrumComputer {
        SpectrumComputer { num, ..SpectrumComputer::default() }
    }

    /// Compute the spectrum of a mesh.
    ///
    /// # Examples
    ///
    /// ```
    /// use brainprint::{SpectrumComputer, TriaMesh};
    /// let spectrum = SpectrumComputer::new(4).compute(&TriaMesh::icosphere(2)).unwrap();
    /// assert!(spectrum.eigenvalues[0].abs() < 1e-6);
    /// assert!((spectrum.eigenvalues[1] - 2.0).abs() < 0.1);
    /// ```
    pub fn compute(&self, mesh: &TriaMesh) -> Result<Spectrum> {
        let fem = FemMatrices::assemble(mesh, self.lump)?;
        self.compute_from_matrices(&fem)
    }

    /// Compute the smallest eigenvalues of an assembled problem. If the problem has fewer
    /// than `num` degrees of freedom, all of its eigenvalues are returned.
    ///
    /// Each restart cycle fills a basis of at most `max(2 num, num + 32)` vectors, then restarts from
    /// the best `num + 8` Ritz vectors and the next Krylov block.
    ///
    /// # Errors
    ///
    /// `BrainprintError::Factorization` if the shifted operator cannot be factorized, and
    /// `BrainprintError::NoConvergence` if not all eigenpairs pass the residual test within `max_iterations` cycles.
    pub fn compute_from_matrices(&self, fem: &FemMatrices) -> Result<Spectrum> {
        let n = fem.dim();
        if n == 0 || self.num == 0 {
            return Ok(Spectrum { eigenvalues: Vec::new(), eigenvectors: None });
        }
        let k = self.num.min(n);
        let p = BLOCK_SIZE.min(n);
        let max_basis = n.min((2 * k).max(k + 4 * p));
        let max_kept = (k + p).min(max_basis.saturating_sub(p)).max(k.min(max_basis));

        let solver = factorize(self.solver, &fem.shifted(self.shift))?;
        let norm_a = norm_inf(&fem.stiffness);
        let norm_b = norm_inf(&fem.mass);

        let mut rng = Lcg::new(42);
        let empty = DMatrix::zeros(n, 0);
        let mut kept = DMatrix::zeros(n, 0);
        let mut front = b_orthonormalize(&empty, 0, rng.block(n, p), &fem.mass);
        let mut converged = 0;

        for cycle in 1..=self.max_iterations {
            let mut basis = DMatrix::zeros(n, max_basis);
            basis.columns_mut(0, kept.ncols()).copy_from(&kept);
            let mut cols = kept.ncols();
            let mut last = (cols, 0);
            while front.ncols() > 0 && cols < max_basis {
                let take = front.ncols().min(max_basis - cols);
                basis.columns_mut(cols, take).copy_from(&front.columns(0, take));
                last = (cols, take);
                cols += take;
                if cols == max_basis {
                    break;
                }
                let image = apply_operator(solver.as_ref(), &fem.mass, &basis.columns(last.0, last.1).into_owned())?;
                front = next_block(&basis, cols, image, &fem.mass, &mut rng);
            }
            let basis = basis.columns(0, cols).into_owned();

            let ritz = SymmetricEigen::new(projected(&fem.stiffness, &basis));
            let values: Vec<f64> = ritz.eigenvalues.iter().cloned().collect();
            let order = ascending_order(&values);
            let theta: Vec<f64> = order.iter().map(|&i| values[i]).collect();
            let num_kept = max_kept.min(cols);
            let coefficients = DMatrix::from_fn(cols, num_kept, |i, c| ritz.eigenvectors[(i, order[c])]);
            let x = &basis * coefficients;

            let found = k.min(cols);
            let xk = x.columns(0, found).into_owned();
            let ax = sparse_mul_block(&fem.stiffness, &xk);
            let bx = sparse_mul_block(&fem.mass, &xk);
            converged = (0..found).take_while(|&i| {
                let residual = (ax.column(i) - bx.column(i) * theta[i]).norm();
                residual <= self.tolerance * (norm_a + theta[i].abs() * norm_b) * xk.column(i).norm()
            }).count();

            if converged == k {
                log::debug!("Block Lanczos converged after {} restart cycles for {} eigenpairs of a {}x{} problem.", cycle, k, n, n);
                return Ok(self.spectrum_from_ritz_pairs(&theta[..k], &x, k));
            }

            // Thick restart: the best Ritz vectors plus the Krylov block following the basis.
            if last.1 > 0 && cols < n {
                let image = apply_operator(solver.as_ref(), &fem.mass, &basis.columns(last.0, last.1).into_owned())?;
                front = next_block(&basis, cols, image, &fem.mass, &mut rng);
            } else {
                front = next_block(&basis, cols, rng.block(n, p), &fem.mass, &mut rng);
            }
            kept = x;
        }

        Err(BrainprintError::NoConvergence(k, converged, self.max_iterations))
    }

    fn spectrum_from_ritz_pairs(&self, theta: &[f64], x: &DMatrix<f64>, k: usize) -> Spectrum {
        // The operator is positive semi-definite, negative values are round-off.
        let eigenvalues: Vec<f64> = theta.iter().map(|&t| t.max(0.0)).collect();

        let eigenvectors = if self.eigenvectors {
            let mut evecs = Array2::<f64>::zeros((x.nrows(), k));
            for j in 0..k {
                let evec = x.column(j);
                // Fix the sign: the entry with the largest magnitude is positive.
                let pivot = evec.iter().cloned().fold(0.0, |acc: f64, v| if v.abs() > acc.abs() { v } else { acc });
                let sign = if pivot < 0.0 { -1.0 } else { 1.0 };
                for i in 0..x.nrows() {
                    evecs[[i, j]] = sign * evec[i];
                }
            }
            Some(evecs)
        } else {
            None
        };

        Spectrum { eigenvalues, eigenvectors }
    }
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::fem::mul_vec;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    /// Eigenvalues of the Laplace-Beltrami operator on the unit sphere: l(l+1) with multiplicity 2l+1.
    fn unit_sphere_spectrum(num: usize) -> Vec<f64> {
        let mut evals = Vec::with_capacity(num);
        let mut l = 0;
        while evals.len() < num {
            for _ in 0..(2 * l + 1) {
                evals.push((l * (l + 1)) as f64);
            }
            l += 1;
        }
        evals.truncate(num);
        evals
    }

    #[test]
    fn the_icosphere_spectrum_matches_the_sphere() {
        let spectrum = SpectrumComputer::new(16).compute(&TriaMesh::icosphere(3)).unwrap();
        let expected = unit_sphere_spectrum(16);

        assert_eq!(16, spectrum.len());
        assert!(spectrum.eigenvectors.is_none());
        assert!(spectrum.eigenvalues[0] < 1e-6 * spectrum.eigenvalues[1]);
        for (computed, expected) in spectrum.eigenvalues.iter().zip(expected.iter()).skip(1) {
            assert_relative_eq!(*expected, *computed, max_relative = 0.05);
        }
    }

    #[test]
    fn eigenvalues_are_non_decreasing() {
        let spectrum = SpectrumComputer::new(20).compute(&TriaMesh::icosphere(2).scaled(2.5)).unwrap();
        for pair in spectrum.eigenvalues.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
    }

    #[test]
    fn both_solvers_give_the_same_spectrum() {
        let mesh = TriaMesh::icosphere(2);
        let chol = SpectrumComputer { solver: SolverKind::Cholesky, ..SpectrumComputer::new(12) }.compute(&mesh).unwrap();
        let lu = SpectrumComputer { solver: SolverKind::Lu, ..SpectrumComputer::new(12) }.compute(&mesh).unwrap();
        for (a, b) in chol.eigenvalues.iter().zip(lu.eigenvalues.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-6);
        }
    }

    #[test]
    fn eigenvalues_scale_with_the_inverse_squared_size() {
        let mesh = TriaMesh::icosphere(2);
        let unit = SpectrumComputer::new(6).compute(&mesh).unwrap();
        let large = SpectrumComputer::new(6).compute(&mesh.scaled(3.0)).unwrap();
        for (u, l) in unit.eigenvalues.iter().zip(large.eigenvalues.iter()).skip(1) {
            assert_relative_eq!(*u / 9.0, *l, max_relative = 1e-6);
        }
    }

    #[test]
    fn eigenvectors_are_mass_orthonormal_eigenpairs() {
        let mesh = TriaMesh::icosphere(2);
        let computer = SpectrumComputer { eigenvectors: true, ..SpectrumComputer::new(5) };
        let spectrum = computer.compute(&mesh).unwrap();
        let evecs = spectrum.eigenvectors.unwrap();
        assert_eq!((mesh.num_vertices(), 5), evecs.dim());

        let fem = FemMatrices::assemble(&mesh, false).unwrap();
        for j in 0..5 {
            let x: Vec<f64> = evecs.column(j).to_vec();
            let ax = mul_vec(&fem.stiffness, &x);
            let bx = mul_vec(&fem.mass, &x);
            let xbx: f64 = x.iter().zip(bx.iter()).map(|(a, b)| a * b).sum();
            assert_abs_diff_eq!(1.0, xbx, epsilon = 1e-8);
            for (a, b) in ax.iter().zip(bx.iter()) {
                assert_abs_diff_eq!(*a, spectrum.eigenvalues[j] * b, epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn small_problems_return_all_eigenvalues() {
        let tet = TriaMesh::new(
            vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            vec![[0, 2, 1], [0, 1, 3], [0, 3, 2], [1, 2, 3]],
        ).unwrap();
        let spectrum = SpectrumComputer::new(10).compute(&tet).unwrap();
        assert_eq!(4, spectrum.len());
        assert_abs_diff_eq!(0.0, spectrum.eigenvalues[0], epsilon = 1e-9);
        assert!(spectrum.eigenvalues[1] > 0.0);
    }

    #[test]
    fn lumped_mass_gives_a_similar_spectrum() {
        let mesh = TriaMesh::icosphere(3);
        let lumped = SpectrumComputer { lump: true, ..SpectrumComputer::new(4) }.compute(&mesh).unwrap();
        for ev in lumped.eigenvalues.iter().skip(1) {
            assert_relative_eq!(2.0, *ev, max_relative = 0.05);
        }
    }

    #[test]
    fn many_eigenvalues_converge_within_a_few_restarts() {
        // l = 0..6 on a finer sphere, 49 values ending at a full multiplet.
        let computer = SpectrumComputer { max_iterations: 40, ..SpectrumComputer::new(49) };
        let spectrum = computer.compute(&TriaMesh::icosphere(4)).unwrap();
        let expected = unit_sphere_spectrum(49);
        assert_eq!(49, spectrum.len());
        for (computed, expected) in spectrum.eigenvalues.iter().zip(expected.iter()).skip(1) {
            assert_relative_eq!(*expected, *computed, max_relative = 0.05);
        }
    }

    #[test]
    fn block_products_match_vector_products() {
        let fem = FemMatrices::assemble(&TriaMesh::icosphere(1), false).unwrap();
        let mut rng = Lcg::new(7);
        let x = rng.block(fem.dim(), 3);
        let y = sparse_mul_block(&fem.stiffness, &x);
        for j in 0..3 {
            let expected = mul_vec(&fem.stiffness, column(&x, j));
            for (a, b) in column(&y, j).iter().zip(expected.iter()) {
                assert_abs_diff_eq!(*a, *b, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn blocks_are_mass_orthonormalized_against_the_basis() {
        let fem = FemMatrices::assemble(&TriaMesh::icosphere(1), false).unwrap();
        let n = fem.dim();
        let mut rng = Lcg::new(3);
        let basis = b_orthonormalize(&DMatrix::zeros(n, 0), 0, rng.block(n, 4), &fem.mass);
        assert_eq!(4, basis.ncols());

        // Two new directions and two already in the basis.
        let mut w = rng.block(n, 4);
        w.set_column(2, &basis.column(0));
        w.set_column(3, &(basis.column(1) * 2.0 - basis.column(3)));
        let block = b_orthonormalize(&basis, 4, w, &fem.mass);
        assert_eq!(2, block.ncols());

        let cross = basis.tr_mul(&sparse_mul_block(&fem.mass, &block));
        let gram = block.tr_mul(&sparse_mul_block(&fem.mass, &block));
        for v in cross.iter() {
            assert_abs_diff_eq!(0.0, *v, epsilon = 1e-10);
        }
        for i in 0..2 {
            for j in 0..2 {
                assert_abs_diff_eq!(if i == j { 1.0 } else { 0.0 }, gram[(i, j)], epsilon = 1e-10);
            }
        }
    }

    #[test]
    fn an_exhausted_iteration_budget_is_reported() {
        let computer = SpectrumComputer { max_iterations: 1, tolerance: 1e-300, ..SpectrumComputer::new(8) };
        match computer.compute(&TriaMesh::icosphere(2)) {
            Err(BrainprintError::NoConvergence(requested, _, iterations)) => {
                assert_eq!(8, requested);
                assert_eq!(1, iterations);
            },
            other => panic!("expected NoConvergence, got {:?}", other),
        }
    }
}
