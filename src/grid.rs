// pic3d - numerical core of a 3D electrostatic particle-in-cell kernel

//! Grid storage and the guard-cell operators.
//!
//! The logical mesh has size `(nx, ny, nz)`; the stored arrays are
//! extended by one guard cell on each positive face (`nxe = nx + 1`, and
//! analogously for y, z) so that periodic neighbor lookups never need a
//! branch. `Field3` holds one real value per node (the charge density
//! `q`); `Field4` holds four values per node — three meaningful vector
//! components plus one padding slot kept for alignment of groups of four
//! in the fast (x) axis.

use crate::error::PicError;

/// Dimensions of a periodic cubic grid plus its guard-cell extension.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GridSpec {
    /// Logical extent in x.
    pub nx: usize,
    /// Logical extent in y.
    pub ny: usize,
    /// Logical extent in z.
    pub nz: usize,
    /// Extended (guard-inclusive) extent in x, `nx + 1`.
    pub nxe: usize,
    /// Extended extent in y, `ny + 1`.
    pub nye: usize,
    /// Extended extent in z, `nz + 1`.
    pub nze: usize,
}

impl GridSpec {
    /// Build a grid spec for a logical mesh `(nx, ny, nz)`, each of which
    /// must be a power of two (required by the FFT) and at least 2.
    ///
    /// The guard extension is fixed to exactly one cell per axis
    /// (`nxe = nx + 1`) — the minimal extension a periodic-wrap lookup
    /// needs; only the first guard cell on each axis carries meaning,
    /// a mirror of node 0.
    ///
    /// # Errors
    /// Returns [`PicError::NotPowerOfTwo`] if any logical dimension is
    /// not a power of two.
    pub fn new(nx: usize, ny: usize, nz: usize) -> Result<Self, PicError> {
        for (axis, value) in [("x", nx), ("y", ny), ("z", nz)] {
            if value < 2 || !value.is_power_of_two() {
                return Err(PicError::NotPowerOfTwo { axis, value });
            }
        }
        Ok(Self {
            nx,
            ny,
            nz,
            nxe: nx + 1,
            nye: ny + 1,
            nze: nz + 1,
        })
    }

    /// Number of nodes in the extended grid.
    #[must_use]
    pub fn extended_len(&self) -> usize {
        self.nxe * self.nye * self.nze
    }

    /// Flat index of node `(ix, iy, iz)` in the extended grid, x fastest.
    #[must_use]
    #[inline(always)]
    pub fn index(&self, ix: usize, iy: usize, iz: usize) -> usize {
        ix + self.nxe * (iy + self.nye * iz)
    }
}

/// A scalar field on the extended grid (used for charge density `q`).
#[derive(Clone, Debug)]
pub struct Field3 {
    /// The grid this field is defined on.
    pub spec: GridSpec,
    data: Vec<f64>,
}

impl Field3 {
    /// Allocate a zeroed scalar field.
    #[must_use]
    pub fn zeros(spec: GridSpec) -> Self {
        Self { spec, data: vec![0.0; spec.extended_len()] }
    }

    /// Value at node `(ix, iy, iz)`.
    #[must_use]
    #[inline(always)]
    pub fn get(&self, ix: usize, iy: usize, iz: usize) -> f64 {
        self.data[self.spec.index(ix, iy, iz)]
    }

    /// Mutable access to the value at node `(ix, iy, iz)`.
    #[inline(always)]
    pub fn get_mut(&mut self, ix: usize, iy: usize, iz: usize) -> &mut f64 {
        let i = self.spec.index(ix, iy, iz);
        &mut self.data[i]
    }

    /// Raw backing storage, read-only.
    #[must_use]
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// Raw backing storage, mutable.
    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }

    /// Zero every node.
    pub fn clear(&mut self) {
        self.data.iter_mut().for_each(|v| *v = 0.0);
    }

    /// Sum of all *interior* (non-guard) node values, i.e. `Sum q[0..nx,0..ny,0..nz]`.
    #[must_use]
    pub fn interior_sum(&self) -> f64 {
        let spec = self.spec;
        let mut total = 0.0;
        for iz in 0..spec.nz {
            for iy in 0..spec.ny {
                for ix in 0..spec.nx {
                    total += self.get(ix, iy, iz);
                }
            }
        }
        total
    }
}

/// Number of components stored per node of a [`Field4`]: three
/// meaningful vector components plus one padding slot.
pub const FIELD4_STRIDE: usize = 4;

/// A 4-wide vector field on the extended grid (used for the force
/// per unit charge `fxyz`; component 3 is padding).
#[derive(Clone, Debug)]
pub struct Field4 {
    /// The grid this field is defined on.
    pub spec: GridSpec,
    data: Vec<f64>,
}

impl Field4 {
    /// Allocate a zeroed vector field.
    #[must_use]
    pub fn zeros(spec: GridSpec) -> Self {
        Self { spec, data: vec![0.0; spec.extended_len() * FIELD4_STRIDE] }
    }

    /// The three meaningful components at node `(ix, iy, iz)`.
    #[must_use]
    #[inline(always)]
    pub fn get(&self, ix: usize, iy: usize, iz: usize) -> [f64; 3] {
        let base = self.spec.index(ix, iy, iz) * FIELD4_STRIDE;
        [self.data[base], self.data[base + 1], self.data[base + 2]]
    }

    /// Overwrite the three meaningful components at node `(ix, iy, iz)`;
    /// the padding slot is left untouched.
    #[inline(always)]
    pub fn set(&mut self, ix: usize, iy: usize, iz: usize, v: [f64; 3]) {
        let base = self.spec.index(ix, iy, iz) * FIELD4_STRIDE;
        self.data[base] = v[0];
        self.data[base + 1] = v[1];
        self.data[base + 2] = v[2];
    }

    /// Raw backing storage, read-only (groups of 4, last is padding).
    #[must_use]
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// Raw backing storage, mutable.
    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }

    /// Zero every node (including padding).
    pub fn clear(&mut self) {
        self.data.iter_mut().for_each(|v| *v = 0.0);
    }
}

/// Replicate the periodic edges of a vector field after the field solve:
/// copy plane `x=0` to plane `x=Nx`, and analogously for y, z, including
/// the padding component. The corner `(Nx,Ny,Nz)` is copied from
/// `(0,0,0)`.
///
/// This is the inverse of [`accumulate_guard_scalar`]: applying
/// `replicate` after `accumulate` on an already-periodic field is a
/// no-op on the interior.
pub fn replicate_guard_vector(f: &mut Field4) {
    let spec = f.spec;
    let (nx, ny, nz) = (spec.nx, spec.ny, spec.nz);
    // Faces normal to x: copy ix=0 -> ix=nx for all interior (iy,iz).
    for iz in 0..=nz {
        for iy in 0..=ny {
            let src_iz = if iz == nz { 0 } else { iz };
            let src_iy = if iy == ny { 0 } else { iy };
            let v = f.get(0, src_iy, src_iz);
            f.set(nx, iy, iz, v);
        }
    }
    // Faces normal to y: copy iy=0 -> iy=ny for all (ix,iz) (ix already
    // replicated above, so this sweep is now self-consistent on the x
    // guard plane too).
    for iz in 0..=nz {
        for ix in 0..nx {
            let src_iz = if iz == nz { 0 } else { iz };
            let v = f.get(ix, 0, src_iz);
            f.set(ix, ny, iz, v);
        }
    }
    // Faces normal to z: copy iz=0 -> iz=nz for all (ix,iy).
    for iy in 0..ny {
        for ix in 0..nx {
            let v = f.get(ix, iy, 0);
            f.set(ix, iy, nz, v);
        }
    }
}

/// Fold the guard-cell contributions of a charge field back into the
/// periodic interior after deposition: add plane `x=Nx` into plane
/// `x=0` (and analogously y, z), then zero the source plane. Edges and
/// corners are folded in the same sweep by iterating the whole extended
/// shell once.
pub fn accumulate_guard_scalar(f: &mut Field3) {
    let spec = f.spec;
    let (nx, ny, nz) = (spec.nx, spec.ny, spec.nz);
    for iz in 0..=nz {
        for iy in 0..=ny {
            for ix in 0..=nx {
                if ix != nx && iy != ny && iz != nz {
                    continue; // interior node, not part of the guard shell
                }
                let wx = if ix == nx { 0 } else { ix };
                let wy = if iy == ny { 0 } else { iy };
                let wz = if iz == nz { 0 } else { iz };
                let v = f.get(ix, iy, iz);
                *f.get_mut(wx, wy, wz) += v;
                *f.get_mut(ix, iy, iz) = 0.0;
            }
        }
    }
}
