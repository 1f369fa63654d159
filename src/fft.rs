// pic3d - numerical core of a 3D electrostatic particle-in-cell kernel

//! Real-to-complex 3-D FFT.
//!
//! Only the x axis needs the packed real/complex (JPL) trick: `nx` real
//! samples per row are treated as `nxh = nx/2` complex numbers and
//! transformed with a half-length complex FFT, then unscrambled into
//! the true length-`nx` real spectrum (`nxh` complex numbers, with the
//! Nyquist mode's real value folded into the imaginary part of index 0).
//! The y and z axes are plain complex FFTs over their full length: an xy
//! pass, then a z pass. `FftTables` precomputes the bit-reversal
//! (`mixup`) and twiddle (`sct`) tables for all three axis lengths once,
//! to be reused across every step.
//!
//! Sign convention: forward (`isign = +1`) is un-normalized; inverse
//! (`isign = -1`) carries the single `1/(Nx Ny Nz)` normalization
//! factor, applied once at the very end of the inverse pipeline so that
//! `forward` followed by `inverse` is the identity to floating-point
//! precision.

use std::f64::consts::PI;

use num_complex::Complex64;
use num_traits::Zero;

use crate::error::PicError;
use crate::grid::{Field3, Field4};

/// Bit-reversal permutation and twiddle-factor table for one FFT length.
/// `mixup[]`/`sct[]` are precomputed once and reused across every
/// transform of that length.
#[derive(Clone, Debug)]
struct RadixTable {
    n: usize,
    /// `mixup[i]` is the bit-reversal of `i` over `log2(n)` bits.
    mixup: Vec<usize>,
    /// Twiddle factors `exp(-i*pi*j/(n/2))` for `j in 0..n/2`.
    sct: Vec<Complex64>,
}

impl RadixTable {
    fn new(n: usize) -> Self {
        debug_assert!(n.is_power_of_two());
        let bits = n.trailing_zeros();
        let mixup = (0..n).map(|i| reverse_bits(i, bits)).collect();
        let half = n / 2;
        let sct = (0..half.max(1))
            .map(|j| {
                let theta = -PI * (j as f64) / (half.max(1) as f64);
                Complex64::new(theta.cos(), theta.sin())
            })
            .collect();
        Self { n, mixup, sct }
    }
}

fn reverse_bits(mut i: usize, bits: u32) -> usize {
    let mut r = 0usize;
    for _ in 0..bits {
        r = (r << 1) | (i & 1);
        i >>= 1;
    }
    r
}

/// In-place iterative radix-2 decimation-in-time FFT, unnormalized in
/// both directions. `sign > 0.0` is the forward transform
/// (`exp(-i*2*pi*kn/n)`); `sign < 0.0` conjugates the twiddles, giving
/// the un-normalized backward transform (`n` times the mathematically
/// normalized inverse).
fn fft_complex(data: &mut [Complex64], table: &RadixTable, sign: f64) {
    let n = data.len();
    assert_eq!(n, table.n, "fft length does not match precomputed table");
    if n <= 1 {
        return;
    }
    for i in 0..n {
        let j = table.mixup[i];
        if j > i {
            data.swap(i, j);
        }
    }
    let mut len = 2;
    while len <= n {
        let half = len / 2;
        let step = n / len;
        let mut start = 0;
        while start < n {
            for k in 0..half {
                let w = if sign > 0.0 { table.sct[k * step] } else { table.sct[k * step].conj() };
                let u = data[start + k];
                let v = data[start + k + half] * w;
                data[start + k] = u + v;
                data[start + k + half] = u - v;
            }
            start += len;
        }
        len <<= 1;
    }
}

/// Forward real-packed transform of one row of `m = n/2` complex values
/// (already holding `z[k] = x[2k] + i*x[2k+1]`), overwritten in place
/// with the packed spectrum: `row[0] = (X[0], X[n/2])`, `row[k] = X[k]`
/// for `k in 1..m` (the JPL packed-real convention).
fn real_fft_forward_1d(row: &mut [Complex64], table: &RadixTable) {
    let m = row.len();
    let n = 2 * m;
    fft_complex(row, table, 1.0);
    let z = row.to_vec();
    for k in 1..m {
        let zk = z[k];
        let zc = z[(m - k) % m].conj();
        let xe = (zk + zc) * 0.5;
        let xo = (zk - zc) * Complex64::new(0.0, -0.5);
        let theta = -2.0 * PI * (k as f64) / (n as f64);
        let w = Complex64::new(theta.cos(), theta.sin());
        row[k] = xe + w * xo;
    }
    let xe0 = z[0].re;
    let xo0 = z[0].im;
    row[0] = Complex64::new(xe0 + xo0, xe0 - xo0);
}

/// Inverse of [`real_fft_forward_1d`]: given a packed spectrum, recovers
/// `n = 2*m` real samples as `m` complex pairs (`out[k].re = x[2k]`,
/// `out[k].im = x[2k+1]`), unnormalized — the caller applies the single
/// `1/(Nx*Ny*Nz)` factor once, at the end of the full 3-D inverse.
fn real_fft_inverse_1d(row: &mut [Complex64], table: &RadixTable) {
    let m = row.len();
    let n = 2 * m;
    let pack = row.to_vec();
    let x0 = pack[0].re;
    let xnyq = pack[0].im;
    let xe0 = (x0 + xnyq) * 0.5;
    let xo0 = (x0 - xnyq) * 0.5;
    row[0] = Complex64::new(xe0, xo0);
    for k in 1..m {
        let xk = pack[k];
        let xmk_conj = pack[(m - k) % m].conj();
        let theta = -2.0 * PI * (k as f64) / (n as f64);
        let w = Complex64::new(theta.cos(), theta.sin());
        let xe = (xk + xmk_conj) * 0.5;
        let xo = (xk - xmk_conj) / (2.0 * w);
        row[k] = xe + Complex64::new(0.0, 1.0) * xo;
    }
    fft_complex(row, table, -1.0);
    // The raw backward transform above gives m*z; the other two axes'
    // plain complex round trips naturally scale by their own full
    // length (see fft_complex docs), so this axis is rescaled by 2 to
    // match (m*2 = n), keeping a single 1/(Nx*Ny*Nz) correct overall.
    for v in row.iter_mut() {
        *v *= 2.0;
    }
}

/// Precomputed mixup/twiddle tables for all three axis lengths of one
/// grid, built once and reused across all FFTs for a given problem
/// size.
#[derive(Clone, Debug)]
pub struct FftTables {
    nx: usize,
    ny: usize,
    nz: usize,
    nxh: usize,
    table_x: RadixTable,
    table_y: RadixTable,
    table_z: RadixTable,
}

impl FftTables {
    /// Build tables for a logical grid `(nx, ny, nz)`, all powers of two.
    ///
    /// # Errors
    /// Returns [`PicError::NotPowerOfTwo`] otherwise.
    pub fn new(nx: usize, ny: usize, nz: usize) -> Result<Self, PicError> {
        for (axis, v) in [("x", nx), ("y", ny), ("z", nz)] {
            if v < 2 || !v.is_power_of_two() {
                return Err(PicError::NotPowerOfTwo { axis, value: v });
            }
        }
        let nxh = nx / 2;
        Ok(Self {
            nx,
            ny,
            nz,
            nxh,
            table_x: RadixTable::new(nxh.max(1)),
            table_y: RadixTable::new(ny),
            table_z: RadixTable::new(nz),
        })
    }
}

/// Shape of the Fourier-space representation: x halved per the real/
/// complex packing, y and z at full length.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpectralShape {
    /// Halved x extent, `nx / 2`.
    pub nxh: usize,
    /// Full y extent.
    pub ny: usize,
    /// Full z extent.
    pub nz: usize,
}

impl SpectralShape {
    #[must_use]
    pub(crate) fn len(&self) -> usize {
        self.nxh * self.ny * self.nz
    }

    #[must_use]
    #[inline(always)]
    fn index(&self, ix: usize, iy: usize, iz: usize) -> usize {
        ix + self.nxh * (iy + self.ny * iz)
    }
}

/// Transformed charge density `q̂`: one complex value per Fourier mode,
/// x packed per the JPL convention.
#[derive(Clone, Debug)]
pub struct SpectralScalar {
    /// The shape this buffer is defined on.
    pub shape: SpectralShape,
    data: Vec<Complex64>,
}

impl SpectralScalar {
    /// Allocate an all-zero buffer of the given shape.
    #[must_use]
    pub(crate) fn zeros(shape: SpectralShape) -> Self {
        Self { shape, data: vec![Complex64::zero(); shape.len()] }
    }

    /// Value at Fourier mode `(ix, iy, iz)`.
    #[must_use]
    pub fn get(&self, ix: usize, iy: usize, iz: usize) -> Complex64 {
        self.data[self.shape.index(ix, iy, iz)]
    }

    /// Mutable access to the value at Fourier mode `(ix, iy, iz)`.
    pub fn get_mut(&mut self, ix: usize, iy: usize, iz: usize) -> &mut Complex64 {
        let i = self.shape.index(ix, iy, iz);
        &mut self.data[i]
    }
}

/// Transformed force field `fxyẑ`: one complex 3-vector per Fourier
/// mode.
#[derive(Clone, Debug)]
pub struct SpectralVector {
    /// The shape this buffer is defined on.
    pub shape: SpectralShape,
    data: Vec<[Complex64; 3]>,
}

impl SpectralVector {
    /// Allocate an all-zero buffer of the given shape.
    #[must_use]
    pub(crate) fn zeros(shape: SpectralShape) -> Self {
        Self { shape, data: vec![[Complex64::zero(); 3]; shape.len()] }
    }

    /// Value at Fourier mode `(ix, iy, iz)`.
    #[must_use]
    pub fn get(&self, ix: usize, iy: usize, iz: usize) -> [Complex64; 3] {
        self.data[self.shape.index(ix, iy, iz)]
    }

    /// Overwrite the value at Fourier mode `(ix, iy, iz)`.
    pub fn set(&mut self, ix: usize, iy: usize, iz: usize, v: [Complex64; 3]) {
        let i = self.shape.index(ix, iy, iz);
        self.data[i] = v;
    }
}

fn shape_of(tables: &FftTables) -> SpectralShape {
    SpectralShape { nxh: tables.nxh, ny: tables.ny, nz: tables.nz }
}

/// Forward transform of the (interior, logical `nx x ny x nz`) part of
/// a charge field: the xy pass (real-packed x, then complex y) followed
/// by the z pass.
#[must_use]
pub fn fft_scalar_forward(field: &Field3, tables: &FftTables) -> SpectralScalar {
    let shape = shape_of(tables);
    let mut out = SpectralScalar::zeros(shape);

    for iz in 0..tables.nz {
        for iy in 0..tables.ny {
            let mut row = vec![Complex64::zero(); shape.nxh];
            for k in 0..shape.nxh {
                row[k] = Complex64::new(field.get(2 * k, iy, iz), field.get(2 * k + 1, iy, iz));
            }
            real_fft_forward_1d(&mut row, &tables.table_x);
            for (k, v) in row.into_iter().enumerate() {
                *out.get_mut(k, iy, iz) = v;
            }
        }
    }
    for iz in 0..tables.nz {
        for ix in 0..shape.nxh {
            let mut col: Vec<Complex64> = (0..tables.ny).map(|iy| out.get(ix, iy, iz)).collect();
            fft_complex(&mut col, &tables.table_y, 1.0);
            for (iy, v) in col.into_iter().enumerate() {
                *out.get_mut(ix, iy, iz) = v;
            }
        }
    }
    for iy in 0..tables.ny {
        for ix in 0..shape.nxh {
            let mut col: Vec<Complex64> = (0..tables.nz).map(|iz| out.get(ix, iy, iz)).collect();
            fft_complex(&mut col, &tables.table_z, 1.0);
            for (iz, v) in col.into_iter().enumerate() {
                *out.get_mut(ix, iy, iz) = v;
            }
        }
    }
    out
}

/// Inverse transform: z pass, then y pass, then the real-packed x pass,
/// then the single `1/(Nx*Ny*Nz)` normalization. Writes into the
/// interior nodes of `out`; guard cells are left untouched (the caller
/// replicates them afterward).
pub fn fft_scalar_inverse(spectral: &SpectralScalar, tables: &FftTables, out: &mut Field3) {
    let shape = spectral.shape;
    let mut data = spectral.data.clone();
    let idx = |ix: usize, iy: usize, iz: usize| shape.index(ix, iy, iz);

    for iy in 0..tables.ny {
        for ix in 0..shape.nxh {
            let mut col: Vec<Complex64> = (0..tables.nz).map(|iz| data[idx(ix, iy, iz)]).collect();
            fft_complex(&mut col, &tables.table_z, -1.0);
            for (iz, v) in col.into_iter().enumerate() {
                data[idx(ix, iy, iz)] = v;
            }
        }
    }
    for iz in 0..tables.nz {
        for ix in 0..shape.nxh {
            let mut col: Vec<Complex64> = (0..tables.ny).map(|iy| data[idx(ix, iy, iz)]).collect();
            fft_complex(&mut col, &tables.table_y, -1.0);
            for (iy, v) in col.into_iter().enumerate() {
                data[idx(ix, iy, iz)] = v;
            }
        }
    }
    let total = (tables.nx * tables.ny * tables.nz) as f64;
    for iz in 0..tables.nz {
        for iy in 0..tables.ny {
            let mut row: Vec<Complex64> = (0..shape.nxh).map(|ix| data[idx(ix, iy, iz)]).collect();
            real_fft_inverse_1d(&mut row, &tables.table_x);
            for (k, v) in row.into_iter().enumerate() {
                *out.get_mut(2 * k, iy, iz) = v.re / total;
                *out.get_mut(2 * k + 1, iy, iz) = v.im / total;
            }
        }
    }
}

/// Vector (3-component) forward transform, applying the scalar recipe
/// to each of x, y, z independently, component-wise over the 3-vector
/// field.
#[must_use]
pub fn fft_vector_forward(field: &Field4, tables: &FftTables) -> SpectralVector {
    let shape = shape_of(tables);
    let mut out = SpectralVector::zeros(shape);
    for comp in 0..3 {
        let mut scratch = Field3::zeros(crate::grid::GridSpec {
            nx: tables.nx,
            ny: tables.ny,
            nz: tables.nz,
            nxe: tables.nx + 1,
            nye: tables.ny + 1,
            nze: tables.nz + 1,
        });
        for iz in 0..tables.nz {
            for iy in 0..tables.ny {
                for ix in 0..tables.nx {
                    *scratch.get_mut(ix, iy, iz) = field.get(ix, iy, iz)[comp];
                }
            }
        }
        let transformed = fft_scalar_forward(&scratch, tables);
        for iz in 0..tables.nz {
            for iy in 0..tables.ny {
                for ix in 0..shape.nxh {
                    let mut v = out.get(ix, iy, iz);
                    v[comp] = transformed.get(ix, iy, iz);
                    out.set(ix, iy, iz, v);
                }
            }
        }
    }
    out
}

/// Vector inverse transform, writing all three (meaningful) components
/// of `out`; the padding component is left untouched.
pub fn fft_vector_inverse(spectral: &SpectralVector, tables: &FftTables, out: &mut Field4) {
    for comp in 0..3 {
        let shape = spectral.shape;
        let mut scalar = SpectralScalar::zeros(shape);
        for iz in 0..tables.nz {
            for iy in 0..tables.ny {
                for ix in 0..shape.nxh {
                    *scalar.get_mut(ix, iy, iz) = spectral.get(ix, iy, iz)[comp];
                }
            }
        }
        let mut scratch = Field3::zeros(crate::grid::GridSpec {
            nx: tables.nx,
            ny: tables.ny,
            nz: tables.nz,
            nxe: tables.nx + 1,
            nye: tables.ny + 1,
            nze: tables.nz + 1,
        });
        fft_scalar_inverse(&scalar, tables, &mut scratch);
        for iz in 0..tables.nz {
            for iy in 0..tables.ny {
                for ix in 0..tables.nx {
                    let mut v = out.get(ix, iy, iz);
                    v[comp] = scratch.get(ix, iy, iz);
                    out.set(ix, iy, iz, v);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GridSpec;

    fn fill_pseudo_random(field: &mut Field3, nx: usize, ny: usize, nz: usize) {
        let mut state: u64 = 88172645463325252;
        let mut next = || {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            ((state >> 11) as f64) / ((1u64 << 53) as f64)
        };
        for iz in 0..nz {
            for iy in 0..ny {
                for ix in 0..nx {
                    *field.get_mut(ix, iy, iz) = next() * 2.0 - 1.0;
                }
            }
        }
    }

    #[test]
    fn round_trip_identity_on_pseudo_random_field() {
        let (nx, ny, nz) = (8, 8, 8);
        let spec = GridSpec::new(nx, ny, nz).unwrap();
        let tables = FftTables::new(nx, ny, nz).unwrap();
        let mut field = Field3::zeros(spec);
        fill_pseudo_random(&mut field, nx, ny, nz);
        let original = field.clone();

        let spectral = fft_scalar_forward(&field, &tables);
        let mut recovered = Field3::zeros(spec);
        fft_scalar_inverse(&spectral, &tables, &mut recovered);

        let mut max_abs_orig = 0.0_f64;
        let mut max_diff = 0.0_f64;
        for iz in 0..nz {
            for iy in 0..ny {
                for ix in 0..nx {
                    let a = original.get(ix, iy, iz);
                    let b = recovered.get(ix, iy, iz);
                    max_abs_orig = max_abs_orig.max(a.abs());
                    max_diff = max_diff.max((a - b).abs());
                }
            }
        }
        assert!(max_diff < 1e-5 * max_abs_orig.max(1.0), "max_diff={max_diff}");
    }

    #[test]
    fn forward_transform_of_constant_field_is_pure_dc() {
        let (nx, ny, nz) = (8, 4, 4);
        let spec = GridSpec::new(nx, ny, nz).unwrap();
        let tables = FftTables::new(nx, ny, nz).unwrap();
        let mut field = Field3::zeros(spec);
        for iz in 0..nz {
            for iy in 0..ny {
                for ix in 0..nx {
                    *field.get_mut(ix, iy, iz) = 3.0;
                }
            }
        }
        let spectral = fft_scalar_forward(&field, &tables);
        let dc = spectral.get(0, 0, 0).re;
        assert!((dc - 3.0 * (nx * ny * nz) as f64).abs() < 1e-8);
        // every other mode (including the x-Nyquist packed in the
        // imaginary part of index 0) should be ~0 for a constant field
        for iz in 0..nz {
            for iy in 0..ny {
                for ix in 0..tables.nxh {
                    if ix == 0 && iy == 0 && iz == 0 {
                        continue;
                    }
                    let v = spectral.get(ix, iy, iz);
                    assert!(v.norm() < 1e-8, "mode {ix},{iy},{iz} = {v:?}");
                }
            }
        }
        assert!(spectral.get(0, 0, 0).im.abs() < 1e-8);
    }
}
