//! Linear algebra helpers for the covariance arithmetic.
//!
//! Public API:
//!     pub fn symmetrize()       — P ← 0.5 (P + Pᵀ)
//!     pub fn solve_gain()       — Kalman gain via double-precision Cholesky
//!     pub fn nearest_psd()      — eigenvalue-clamp projection onto the PSD cone
//!
//! The filter state is single precision, but gain solves are numerically the
//! most fragile step, so they run in `f64`: the caller widens the innovation
//! covariance and the cross term, and narrows the returned gain.

use nalgebra::allocator::Allocator;
use nalgebra::linalg::{Cholesky, SymmetricEigen};
use nalgebra::{Const, DefaultAllocator, DimDiff, DimSub, SMatrix, U1};

/// Eigenvalues below this are treated as degenerate.
const EIGEN_THRESHOLD: f32 = 1e-10;
/// Degenerate eigenvalues are clamped up to this value.
const EIGEN_FLOOR: f32 = 1e-8;

/// Symmetrize a matrix: P ← 0.5 (P + Pᵀ)
///
/// Reduces the round-off asymmetry that accumulates through repeated
/// propagate/update cycles.
#[inline]
pub fn symmetrize<const N: usize>(m: &SMatrix<f32, N, N>) -> SMatrix<f32, N, N> {
    0.5 * (m + m.transpose())
}

/// Solve `K · W = C` for the Kalman gain `K`, where `W` (M×M) is the
/// innovation covariance and `C = P Hᵀ` (N×M) is the cross covariance.
///
/// `W` is symmetrized and factored by Cholesky; failures walk a geometric
/// jitter ramp on the diagonal, then fall back to an explicit inverse. If
/// every attempt fails the gain is zero, which turns the update into a no-op
/// rather than corrupting the state.
pub fn solve_gain<const N: usize, const M: usize>(
    w: &SMatrix<f64, M, M>,
    cross: &SMatrix<f64, N, M>,
) -> SMatrix<f64, N, M> {
    const INITIAL_JITTER: f64 = 1e-12;
    const MAX_JITTER: f64 = 1e-6;
    const MAX_TRIES: usize = 6;

    let w_sym = 0.5 * (w + w.transpose());
    // K W = C  ⇔  W Kᵀ = Cᵀ (W symmetric).
    let rhs = cross.transpose();

    if let Some(ch) = Cholesky::new(w_sym) {
        return ch.solve(&rhs).transpose();
    }

    let mut jitter = INITIAL_JITTER;
    for _ in 0..MAX_TRIES {
        let mut w_j = w_sym;
        for i in 0..M {
            w_j[(i, i)] += jitter;
        }
        if let Some(ch) = Cholesky::new(w_j) {
            return ch.solve(&rhs).transpose();
        }
        jitter *= 10.0;
        if jitter > MAX_JITTER {
            break;
        }
    }

    if let Some(inv) = w_sym.try_inverse() {
        return cross * inv;
    }

    log::warn!("gain solve failed, skipping update (innovation covariance singular)");
    SMatrix::zeros()
}

/// Project a covariance back onto the positive-semidefinite cone by clamping
/// its eigenvalues.
///
/// The matrix is symmetrized, eigendecomposed, and rebuilt with every
/// eigenvalue below `1e-10` raised to `1e-8`. When no eigenvalue needs
/// clamping the symmetrized input is kept as-is, so the projection is
/// idempotent. Returns whether clamping occurred.
pub fn nearest_psd<const N: usize>(p: &mut SMatrix<f32, N, N>) -> bool
where
    Const<N>: DimSub<U1>,
    DefaultAllocator: Allocator<DimDiff<Const<N>, U1>>,
{
    *p = symmetrize(p);
    let se = SymmetricEigen::<f32, Const<N>>::new(*p);
    let mut lambdas = se.eigenvalues;
    let u = se.eigenvectors;

    let mut clamped = false;
    for i in 0..N {
        if lambdas[i] < EIGEN_THRESHOLD {
            lambdas[i] = EIGEN_FLOOR;
            clamped = true;
        }
    }
    if !clamped {
        return false;
    }

    let mut rebuilt = SMatrix::<f32, N, N>::from_array_storage(nalgebra::ArrayStorage([[0.0; N]; N]));
    for i in 0..N {
        let v = u.column(i);
        rebuilt += lambdas[i] * v * v.transpose();
    }
    *p = rebuilt;
    true
}

/* =============================== Tests ==================================== */
