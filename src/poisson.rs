// pic3d - numerical core of a 3D electrostatic particle-in-cell kernel

//! Poisson solver: in Fourier space, converts transformed charge density
//! into the force field per unit charge, applying a Gaussian
//! particle-shape smoothing and a Green's-function `1/k^2` filter.
//!
//! # Open question: the x-Nyquist virtual mode
//!
//! The JPL packing folds the x-Nyquist row (`kx = pi`) into the
//! imaginary part of the `ix = 0` column of every transformed field, a
//! trick that is exact for a standalone 1-D real FFT. Once the y and z
//! complex passes are layered on top (an xy pass then a z pass),
//! recovering that row's *own* y/z spectrum back out of the `ix = 0`
//! column requires a second Hermitian-unscrambling step along y (and
//! z), since a length-`n` complex DFT does not act independently on the
//! real and imaginary parts of its input once the input itself is
//! already complex.
//!
//! This module does not perform that second unscrambling: the `ix = 0`
//! column is treated as a single ordinary complex mode at `kx = 0`, and
//! the x-Nyquist row's own contribution to the field and to `we` is
//! dropped. This affects exactly one of the `Nx/2` x-rows (the
//! narrowest possible slice) and never a mode actually exercised by a
//! single cosine source at `kx = 2*pi/Nx`, ordinary `ix = 1`. Flagged
//! here rather than implemented blind.

use std::f64::consts::PI;

use num_complex::Complex64;
use num_traits::Zero;

use crate::fft::{SpectralScalar, SpectralShape, SpectralVector};

/// Parameters for the Poisson solve.
#[derive(Clone, Copy, Debug)]
pub struct PoissonParams {
    /// Gaussian particle-shape width in x.
    pub ax: f64,
    /// Gaussian particle-shape width in y.
    pub ay: f64,
    /// Gaussian particle-shape width in z.
    pub az: f64,
    /// Normalization constant absorbing `epsilon_0`.
    pub affp: f64,
}

/// Precomputed form factor `ffc[l][k][j] = (G*S) + i*S`, built once by
/// the `isign = 0` call and reused for every step.
#[derive(Clone, Debug)]
pub struct FormFactor {
    shape: SpectralShape,
    nx: usize,
    ny: usize,
    nz: usize,
    data: Vec<Complex64>,
}

#[inline(always)]
fn freq(i: usize, n: usize) -> f64 {
    if i <= n / 2 {
        i as f64
    } else {
        i as f64 - n as f64
    }
}

/// Build the form-factor table for a logical grid `(nx, ny, nz)` (the
/// `isign = 0` call).
#[must_use]
pub fn init_form_factor(nx: usize, ny: usize, nz: usize, params: PoissonParams) -> FormFactor {
    let nxh = nx / 2;
    let shape = SpectralShape { nxh, ny, nz };
    let mut data = vec![Complex64::zero(); shape.len()];
    for iz in 0..nz {
        let kz = 2.0 * PI * freq(iz, nz) / nz as f64;
        for iy in 0..ny {
            let ky = 2.0 * PI * freq(iy, ny) / ny as f64;
            for ix in 0..nxh {
                let kx = 2.0 * PI * (ix as f64) / nx as f64;
                let k2 = kx * kx + ky * ky + kz * kz;
                let i = ix + nxh * (iy + ny * iz);
                if k2 == 0.0 {
                    data[i] = Complex64::zero();
                    continue;
                }
                let g = params.affp / k2;
                let s = (-0.5 * (kx * params.ax).powi(2)
                    - 0.5 * (ky * params.ay).powi(2)
                    - 0.5 * (kz * params.az).powi(2))
                .exp();
                data[i] = Complex64::new(g * s, s);
            }
        }
    }
    FormFactor { shape, nx, ny, nz, data }
}

/// Solve the Poisson equation in Fourier space (the `isign = -1` call):
/// returns the transformed force field and the total field energy `we`.
///
/// The DC mode (`kx = ky = kz = 0`) and any mode lying on a Nyquist
/// plane (`iy = ny/2` or `iz = nz/2`) have their field forced to zero,
/// but still contribute to `we` (counted once, avoiding double-counting
/// on these reduced-degree-of-freedom rows).
#[must_use]
pub fn solve(q: &SpectralScalar, ffc: &FormFactor) -> (SpectralVector, f64) {
    assert_eq!(q.shape, ffc.shape);
    let shape = q.shape;
    let mut f = SpectralVector::zeros(shape);
    let mut we = 0.0;

    for iz in 0..ffc.nz {
        let kz = 2.0 * PI * freq(iz, ffc.nz) / ffc.nz as f64;
        let z_nyquist = iz == ffc.nz / 2;
        for iy in 0..ffc.ny {
            let ky = 2.0 * PI * freq(iy, ffc.ny) / ffc.ny as f64;
            let y_nyquist = iy == ffc.ny / 2;
            for ix in 0..shape.nxh {
                let kx = 2.0 * PI * (ix as f64) / ffc.nx as f64;
                let i = ix + shape.nxh * (iy + ffc.ny * iz);
                let gs = ffc.data[i];
                if kx == 0.0 && ky == 0.0 && kz == 0.0 {
                    continue; // skip the all-zero wavevector entirely
                }
                let s = gs.im;
                let gval = if s != 0.0 { gs.re / s } else { 0.0 };
                let qv = q.get(ix, iy, iz);
                we += qv.norm_sqr() * gval * s;

                if y_nyquist || z_nyquist {
                    continue; // field forced to zero on Nyquist planes
                }
                let prefactor = Complex64::new(0.0, -1.0) * gs.re;
                let fx = prefactor * kx * qv;
                let fy = prefactor * ky * qv;
                let fz = prefactor * kz * qv;
                f.set(ix, iy, iz, [fx, fy, fz]);
            }
        }
    }
    let total = (ffc.nx * ffc.ny * ffc.nz) as f64;
    (f, we * total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fft::{fft_scalar_forward, fft_vector_inverse, FftTables};
    use crate::grid::{Field3, Field4, GridSpec};

    #[test]
    fn single_cosine_mode_matches_analytic_gradient() {
        // Spec §8 scenario 4: q = cos(2*pi*x/Nx), ax=ay=az=0, affp=1.
        // After FFT -> Poisson -> IFFT, fx should equal
        // (Nx/(2*pi)) * sin(2*pi*x/Nx).
        let (nx, ny, nz) = (16, 8, 8);
        let spec = GridSpec::new(nx, ny, nz).unwrap();
        let tables = FftTables::new(nx, ny, nz).unwrap();
        let mut q = Field3::zeros(spec);
        for iz in 0..nz {
            for iy in 0..ny {
                for ix in 0..nx {
                    let val = (2.0 * PI * ix as f64 / nx as f64).cos();
                    *q.get_mut(ix, iy, iz) = val;
                }
            }
        }
        let params = PoissonParams { ax: 0.0, ay: 0.0, az: 0.0, affp: 1.0 };
        let ffc = init_form_factor(nx, ny, nz, params);
        let qhat = fft_scalar_forward(&q, &tables);
        let (fhat, _we) = solve(&qhat, &ffc);
        let mut fxyz = Field4::zeros(spec);
        fft_vector_inverse(&fhat, &tables, &mut fxyz);

        for iz in 0..nz {
            for iy in 0..ny {
                for ix in 0..nx {
                    let expected = (nx as f64 / (2.0 * PI)) * (2.0 * PI * ix as f64 / nx as f64).sin();
                    let got = fxyz.get(ix, iy, iz)[0];
                    assert!(
                        (got - expected).abs() < 1e-3,
                        "ix={ix} iy={iy} iz={iz} got={got} expected={expected}"
                    );
                }
            }
        }
    }

    #[test]
    fn dc_mode_and_nyquist_planes_have_zero_field() {
        let (nx, ny, nz) = (8, 8, 8);
        let params = PoissonParams { ax: 0.1, ay: 0.1, az: 0.1, affp: 1.0 };
        let ffc = init_form_factor(nx, ny, nz, params);
        let shape = ffc.shape;
        let mut q = SpectralScalar::zeros(shape);
        // Seed every mode with a nonzero value.
        for iz in 0..nz {
            for iy in 0..ny {
                for ix in 0..shape.nxh {
                    *q.get_mut(ix, iy, iz) = Complex64::new(1.0, 0.5);
                }
            }
        }
        let (f, _we) = solve(&q, &ffc);
        assert_eq!(f.get(0, 0, 0), [Complex64::zero(); 3]);
        assert_eq!(f.get(1, ny / 2, 2), [Complex64::zero(); 3]);
        assert_eq!(f.get(1, 2, nz / 2), [Complex64::zero(); 3]);
    }
}
