// pic3d - numerical core of a 3D electrostatic particle-in-cell kernel

//! Particle push: gather the force field onto each particle, update
//! velocity and position, apply the boundary policy, accumulate kinetic
//! energy, and — in the "with-flagging" variant — classify departures
//! for [`crate::reorder`].

use crate::grid::Field4;
use crate::helpers::ceil_div;
use crate::particles::{attr, HoleEntry, Ihole, Ncl, ParticleTile};
use crate::tile::{direction_code, TileLayout};

/// SIMD blocking width the segmented particle layout is tuned for. Not
/// load-bearing for correctness here (the loop below is a plain scalar
/// loop, auto-vectorizable by the compiler over contiguous attribute
/// rows); [`crate::particles::check_lane_aligned`] is what enforces
/// `nppmx % LANES == 0` at setup time.
pub const LANES: usize = 16;

/// Boundary policy applied to a particle's new position.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoundaryPolicy {
    /// Pure periodic. Positions are left unmodified by push (may
    /// transiently lie outside `[0, Nx)`); the periodic wrap is applied
    /// only when a particle is classified as leaving its tile, handled
    /// by [`crate::reorder`].
    Periodic,
    /// Fully reflecting on every axis.
    Reflecting,
    /// Reflecting in x and y, periodic in z.
    ReflectingXYPeriodicZ,
}

/// Parameters for a push call.
#[derive(Clone, Copy, Debug)]
pub struct PushParams {
    /// Charge-to-mass ratio.
    pub qbm: f64,
    /// Time step.
    pub dt: f64,
    /// Boundary policy.
    pub boundary: BoundaryPolicy,
}

/// Result of a push call.
#[derive(Clone, Copy, Debug, Default)]
pub struct PushReport {
    /// Accumulated kinetic energy `ek += 0.125 * Sum |v_new + v_old|^2`.
    pub ek: f64,
    /// Out-of-band capacity-overflow signal; `0` unless the
    /// with-flagging variant overflowed some tile's hole list, in which
    /// case it is the largest hole count observed among the tiles that
    /// overflowed: any non-zero value asks the caller to retry with a
    /// larger `ntmax`.
    pub irc: i32,
}

/// Tile-private gathered slab of the force field, shape
/// `(mx+1) x (my+1) x (mz+1)`, 3 components each (the 4th, padding,
/// component is dropped on gather since it never participates in the
/// interpolation). Block-loading this once per tile before the particle
/// loop is what keeps the inner gather cache-resident.
struct TileFieldSlab {
    mx1: usize,
    my1: usize,
    data: Vec<[f64; 3]>,
}

impl TileFieldSlab {
    fn gather(fxyz: &Field4, noff: usize, moff: usize, loff: usize, mx: usize, my: usize, mz: usize) -> Self {
        let (mx1, my1, mz1) = (mx + 1, my + 1, mz + 1);
        let mut data = vec![[0.0; 3]; mx1 * my1 * mz1];
        for lz in 0..mz1 {
            for ly in 0..my1 {
                for lx in 0..mx1 {
                    let v = fxyz.get(noff + lx, moff + ly, loff + lz);
                    data[lx + mx1 * (ly + my1 * lz)] = v;
                }
            }
        }
        Self { mx1, my1, data }
    }

    #[inline(always)]
    fn get(&self, lx: usize, ly: usize, lz: usize) -> [f64; 3] {
        self.data[lx + self.mx1 * (ly + self.my1 * lz)]
    }
}

/// Push every particle in every tile with no departure classification.
/// See [`push_with_flag`] for the variant that also populates
/// `ncl`/`ihole`.
pub fn push(
    layout: &TileLayout,
    ppart: &mut [ParticleTile],
    kpic: &[usize],
    fxyz: &Field4,
    params: PushParams,
) -> PushReport {
    push_impl(layout, ppart, kpic, fxyz, params, None)
}

/// Push every particle, additionally classifying departures into
/// `ncl`/`ihole` for every tile (the "with-flagging" variant).
///
/// # Panics
/// Panics if `ncl.len()` or `ihole.len()` does not equal the number of
/// tiles.
pub fn push_with_flag(
    layout: &TileLayout,
    ppart: &mut [ParticleTile],
    kpic: &[usize],
    fxyz: &Field4,
    params: PushParams,
    ncl: &mut [Ncl],
    ihole: &mut [Ihole],
    ntmax: usize,
) -> PushReport {
    assert_eq!(ncl.len(), layout.num_tiles());
    assert_eq!(ihole.len(), layout.num_tiles());
    push_impl(layout, ppart, kpic, fxyz, params, Some((ncl, ihole, ntmax)))
}

fn push_impl(
    layout: &TileLayout,
    ppart: &mut [ParticleTile],
    kpic: &[usize],
    fxyz: &Field4,
    params: PushParams,
    mut flag: Option<(&mut [Ncl], &mut [Ihole], usize)>,
) -> PushReport {
    assert_eq!(ppart.len(), layout.num_tiles());
    assert_eq!(kpic.len(), layout.num_tiles());

    let mut ek_total = 0.0;

    for l in 0..layout.num_tiles() {
        let tile_flag = flag
            .as_deref_mut()
            .map(|(ncl, ihole, ntmax)| (&mut ncl[l], &mut ihole[l], *ntmax));
        ek_total += push_one_tile(layout, l, &mut ppart[l], kpic[l], fxyz, params, tile_flag);
    }

    let irc = if let Some((_, ihole, _)) = flag.as_deref() {
        overflow_irc(ihole)
    } else {
        0
    };

    PushReport { ek: ek_total, irc }
}

/// Same contract as [`push`]/[`push_with_flag`], but tiles are fanned
/// out across `thread_pool`: each worker gathers its own chunk of
/// tiles' `sfxyz` slabs and pushes their particles independently,
/// fork/join over tiles. Per-chunk kinetic energy and overflow counts
/// are written into preallocated buffers and reduced once after the
/// scoped region ends: `ek` is a local-then-combine reduction rather
/// than a shared atomic.
#[allow(clippy::too_many_arguments)]
#[cfg(not(target_arch = "wasm32"))]
pub fn push_with_flag_parallel(
    layout: &TileLayout,
    ppart: &mut [ParticleTile],
    kpic: &[usize],
    fxyz: &Field4,
    params: PushParams,
    ncl: &mut [Ncl],
    ihole: &mut [Ihole],
    ntmax: usize,
    thread_pool: &mut scoped_threadpool::Pool,
) -> PushReport {
    let n = layout.num_tiles();
    assert_eq!(ppart.len(), n);
    assert_eq!(kpic.len(), n);
    assert_eq!(ncl.len(), n);
    assert_eq!(ihole.len(), n);

    let num_threads = thread_pool.thread_count() as usize;
    if num_threads < 2 {
        return push_impl(layout, ppart, kpic, fxyz, params, Some((ncl, ihole, ntmax)));
    }

    let chunk_size = ceil_div(n, num_threads);
    let num_chunks = ceil_div(n, chunk_size);
    let mut ek_per_chunk = vec![0.0_f64; num_chunks];
    let mut irc_per_chunk = vec![0i32; num_chunks];

    thread_pool.scoped(|s| {
        let ppart_chunks = ppart.chunks_mut(chunk_size);
        let ncl_chunks = ncl.chunks_mut(chunk_size);
        let ihole_chunks = ihole.chunks_mut(chunk_size);
        let out_chunks = ek_per_chunk.iter_mut().zip(irc_per_chunk.iter_mut());
        for (i, (((ppart_chunk, ncl_chunk), ihole_chunk), (ek_out, irc_out))) in ppart_chunks
            .zip(ncl_chunks)
            .zip(ihole_chunks)
            .zip(out_chunks)
            .enumerate()
        {
            let base = i * chunk_size;
            s.execute(move || {
                let mut chunk_ek = 0.0;
                for (offset, tile) in ppart_chunk.iter_mut().enumerate() {
                    let l = base + offset;
                    let tile_flag = Some((&mut ncl_chunk[offset], &mut ihole_chunk[offset], ntmax));
                    chunk_ek += push_one_tile(layout, l, tile, kpic[l], fxyz, params, tile_flag);
                }
                *ek_out = chunk_ek;
                *irc_out = overflow_irc(ihole_chunk);
            });
        }
    });

    PushReport {
        ek: ek_per_chunk.iter().sum(),
        irc: irc_per_chunk.iter().copied().max().unwrap_or(0),
    }
}

/// Push every particle of one tile: gather its force slab, update each
/// particle's velocity/position, apply the boundary policy, optionally
/// classify departures, and return the tile's kinetic-energy
/// contribution.
#[allow(clippy::too_many_arguments)]
fn push_one_tile(
    layout: &TileLayout,
    l: usize,
    tile: &mut ParticleTile,
    kpic_l: usize,
    fxyz: &Field4,
    params: PushParams,
    mut flag: Option<(&mut Ncl, &mut Ihole, usize)>,
) -> f64 {
    let nx = layout.mx1 * layout.mx;
    let ny = layout.my1 * layout.my;
    let nz = layout.mz1 * layout.mz;

    let c = layout.decode(l);
    let noff = c.ix as usize * layout.mx;
    let moff = c.iy as usize * layout.my;
    let loff = c.iz as usize * layout.mz;
    let slab = TileFieldSlab::gather(fxyz, noff, moff, loff, layout.mx, layout.my, layout.mz);

    let mut tile_ek = 0.0_f64;
    for n in 0..kpic_l {
        let x = tile.get(attr::X, n);
        let y = tile.get(attr::Y, n);
        let z = tile.get(attr::Z, n);
        let vx = tile.get(attr::VX, n);
        let vy = tile.get(attr::VY, n);
        let vz = tile.get(attr::VZ, n);

        let (cellx, dx) = split_cell(x - noff as f64);
        let (celly, dy) = split_cell(y - moff as f64);
        let (cellz, dz) = split_cell(z - loff as f64);
        assert!(
            cellx < layout.mx + 1 && celly < layout.my + 1 && cellz < layout.mz + 1,
            "particle in tile {l} outside its owning tile at push time"
        );

        let mut f = [0.0_f64; 3];
        for (a, wa) in [(0usize, 1.0 - dx), (1, dx)] {
            for (b, wb) in [(0usize, 1.0 - dy), (1, dy)] {
                for (cc, wc) in [(0usize, 1.0 - dz), (1, dz)] {
                    let sample = slab.get(cellx + a, celly + b, cellz + cc);
                    let w = wa * wb * wc;
                    f[0] += w * sample[0];
                    f[1] += w * sample[1];
                    f[2] += w * sample[2];
                }
            }
        }

        let new_vx = vx + params.qbm * params.dt * f[0];
        let new_vy = vy + params.qbm * params.dt * f[1];
        let new_vz = vz + params.qbm * params.dt * f[2];

        tile_ek +=
            0.125 * ((new_vx + vx).powi(2) + (new_vy + vy).powi(2) + (new_vz + vz).powi(2));

        let mut new_x = x + new_vx * params.dt;
        let mut new_y = y + new_vy * params.dt;
        let mut new_z = z + new_vz * params.dt;
        let mut fvx = new_vx;
        let mut fvy = new_vy;
        let mut fvz = new_vz;

        apply_boundary(
            params.boundary, nx, ny, nz,
            x, y, z,
            &mut new_x, &mut new_y, &mut new_z,
            &mut fvx, &mut fvy, &mut fvz,
        );

        tile.set(attr::X, n, new_x);
        tile.set(attr::Y, n, new_y);
        tile.set(attr::Z, n, new_z);
        tile.set(attr::VX, n, fvx);
        tile.set(attr::VY, n, fvy);
        tile.set(attr::VZ, n, fvz);

        if let Some((ncl, ihole, ntmax)) = flag.as_deref_mut() {
            classify_departure(layout, l, n, noff, moff, loff, new_x, new_y, new_z, ncl, ihole, *ntmax);
        }
    }
    tile_ek
}

/// Largest overflow count among a set of tiles' hole lists, or `0` if
/// none overflowed — the `irc` reduction reported back to the caller.
fn overflow_irc(ihole: &[Ihole]) -> i32 {
    ihole
        .iter()
        .filter(|h| h.overflow)
        .map(|h| h.entries.len() as i32)
        .max()
        .unwrap_or(0)
}

/// Classify whether particle `n` (now at `(new_x,new_y,new_z)`) left
/// tile `l`, recording a hole if so. Also used by [`crate::reorder`]'s
/// classify phase on already-pushed particles.
pub fn classify_departure(
    layout: &TileLayout,
    l: usize,
    n: usize,
    noff: usize,
    moff: usize,
    loff: usize,
    new_x: f64,
    new_y: f64,
    new_z: f64,
    ncl: &mut Ncl,
    ihole: &mut Ihole,
    ntmax: usize,
) {
    let nx = layout.mx1 * layout.mx;
    let ny = layout.my1 * layout.my;
    let nz = layout.mz1 * layout.mz;

    let dx_code = classify_axis(new_x, noff, layout.mx, nx);
    let dy_code = classify_axis(new_y, moff, layout.my, ny);
    let dz_code = classify_axis(new_z, loff, layout.mz, nz);

    let dir = direction_code(dx_code, dy_code, dz_code);
    if dir == 0 {
        return;
    }
    *ncl.get_mut(dir) += 1;
    ihole.push(n as u32, dir, ntmax);
}

/// Ternary in/left/right classification of one axis, applying a global
/// periodic wrap first if the step was large enough that the naive
/// classification would point more than one tile away.
fn classify_axis(pos: f64, off: usize, extent: usize, logical_size: usize) -> i32 {
    let lo = off as f64;
    let hi = off as f64 + extent as f64;
    let mut x = pos;
    if x < lo - extent as f64 || x >= hi + extent as f64 {
        x = x.rem_euclid(logical_size as f64);
    }
    if x < lo {
        -1
    } else if x >= hi {
        1
    } else {
        0
    }
}

#[inline(always)]
fn split_cell(x: f64) -> (usize, f64) {
    let n = x.floor();
    debug_assert!(n >= 0.0, "negative local coordinate at push time");
    (n as usize, x - n)
}

#[allow(clippy::too_many_arguments)]
fn apply_boundary(
    policy: BoundaryPolicy,
    nx: usize,
    ny: usize,
    nz: usize,
    old_x: f64,
    old_y: f64,
    old_z: f64,
    x: &mut f64,
    y: &mut f64,
    z: &mut f64,
    vx: &mut f64,
    vy: &mut f64,
    vz: &mut f64,
) {
    match policy {
        BoundaryPolicy::Periodic => {}
        BoundaryPolicy::Reflecting => {
            reflect_axis(x, old_x, vx, nx);
            reflect_axis(y, old_y, vy, ny);
            reflect_axis(z, old_z, vz, nz);
        }
        BoundaryPolicy::ReflectingXYPeriodicZ => {
            reflect_axis(x, old_x, vx, nx);
            reflect_axis(y, old_y, vy, ny);
        }
    }
}

/// Reflecting boundary for one axis: if the new position falls outside
/// `[1, n-1)`, the position reverts to its pre-step value and the
/// velocity component flips sign.
fn reflect_axis(x: &mut f64, old_x: f64, v: &mut f64, n: usize) {
    let lo = 1.0;
    let hi = n as f64 - 1.0;
    if *x < lo || *x >= hi {
        *x = old_x;
        *v = -*v;
    }
}
