// pic3d - numerical core of a 3D electrostatic particle-in-cell kernel

//! Charge deposition: scatter particle weights to the 8 surrounding
//! grid nodes per particle using cloud-in-cell (CIC) interpolation.

use crate::grid::{Field3, GridSpec};
use crate::helpers::ceil_div;
use crate::particles::{attr, ParticleTile};
use crate::tile::TileLayout;

/// A private per-tile scalar accumulator of shape
/// `(mx+1) x (my+1) x (mz+1)`, used so that concurrent tiles never write
/// to the same memory while depositing.
struct TileAccumulator {
    mx1: usize,
    my1: usize,
    data: Vec<f64>,
}

impl TileAccumulator {
    fn zeros(mx: usize, my: usize, mz: usize) -> Self {
        let (mx1, my1, mz1) = (mx + 1, my + 1, mz + 1);
        Self { mx1, my1, data: vec![0.0; mx1 * my1 * mz1] }
    }

    #[inline(always)]
    fn index(&self, n: usize, m: usize, l: usize) -> usize {
        n + self.mx1 * (m + self.my1 * l)
    }

    #[inline(always)]
    fn add(&mut self, n: usize, m: usize, l: usize, v: f64) {
        let i = self.index(n, m, l);
        self.data[i] += v;
    }
}

/// Deposit the charge of every particle in every tile onto `q`, using
/// the charge-per-particle `qm`.
///
/// `q` is fully accumulated into (it is the caller's job to clear it
/// first, or to rely on [`crate::grid::Field3::clear`] before the
/// call — the step driver always does this, since `q` is recomputed
/// from scratch every step).
///
/// Tiles are processed independently, each into its own private
/// [`TileAccumulator`], and only then folded into the shared `q`; this
/// is the only data-race-free realization of the scatter, and the fold
/// order does not matter since the combination is commutative floating
/// point addition.
///
/// # Panics
/// Panics if any particle's cell falls outside `[0, mx+1) x [0, my+1) x
/// [0, mz+1)` of its owning tile — this indicates a push invariant
/// violation and is a fatal assertion, not a recoverable error.
pub fn deposit(
    layout: &TileLayout,
    ppart: &[ParticleTile],
    kpic: &[usize],
    qm: f64,
    q: &mut Field3,
) {
    assert_eq!(ppart.len(), layout.num_tiles());
    assert_eq!(kpic.len(), layout.num_tiles());

    // Phase 1: each tile deposits into its own private buffer. This is
    // naturally parallel (no shared mutable state is touched), but the
    // crate keeps the actual thread fan-out at the `step` orchestration
    // level where it can be shared with push and reorder; here the
    // tiles are simply computed one after another.
    let mut accs: Vec<TileAccumulator> = Vec::with_capacity(layout.num_tiles());
    for l in 0..layout.num_tiles() {
        let mut acc = TileAccumulator::zeros(layout.mx, layout.my, layout.mz);
        deposit_tile(layout, l, &ppart[l], kpic[l], qm, &mut acc);
        accs.push(acc);
    }

    // Phase 2: fold every tile's private accumulator into the shared
    // field. Interior nodes of a tile are exclusive to it; face/edge/
    // corner nodes are shared with neighbors and are added to here
    // rather than overwritten.
    for l in 0..layout.num_tiles() {
        let c = layout.decode(l);
        let noff = c.ix as usize * layout.mx;
        let moff = c.iy as usize * layout.my;
        let loff = c.iz as usize * layout.mz;
        let acc = &accs[l];
        for lz in 0..=layout.mz {
            for ly in 0..=layout.my {
                for lx in 0..=layout.mx {
                    let v = acc.data[acc.index(lx, ly, lz)];
                    if v == 0.0 {
                        continue;
                    }
                    *q.get_mut(noff + lx, moff + ly, loff + lz) += v;
                }
            }
        }
    }
}

/// Same contract as [`deposit`], but phase 1 (each tile depositing into
/// its own private accumulator) is fanned out across `thread_pool`, one
/// chunk of tiles per worker — the only stage of deposit with any real
/// cost. Phase 2 (folding accumulators into the shared `q`) stays
/// serial; it touches every node of `q` once and is cheap next to the
/// particle scatter.
///
/// Uses `scoped_threadpool`'s chunked `thread_pool.scoped` pattern: with
/// fewer than two worker threads this degrades to the serial loop.
#[cfg(not(target_arch = "wasm32"))]
pub fn deposit_parallel(
    layout: &TileLayout,
    ppart: &[ParticleTile],
    kpic: &[usize],
    qm: f64,
    q: &mut Field3,
    thread_pool: &mut scoped_threadpool::Pool,
) {
    assert_eq!(ppart.len(), layout.num_tiles());
    assert_eq!(kpic.len(), layout.num_tiles());

    let n = layout.num_tiles();
    let num_threads = thread_pool.thread_count() as usize;
    let mut accs: Vec<TileAccumulator> = (0..n)
        .map(|_| TileAccumulator::zeros(layout.mx, layout.my, layout.mz))
        .collect();

    if num_threads < 2 {
        for l in 0..n {
            deposit_tile(layout, l, &ppart[l], kpic[l], qm, &mut accs[l]);
        }
    } else {
        let chunk_size = ceil_div(n, num_threads);
        thread_pool.scoped(|s| {
            for (i, acc_chunk) in accs.chunks_mut(chunk_size).enumerate() {
                let base = i * chunk_size;
                s.execute(move || {
                    for (offset, acc) in acc_chunk.iter_mut().enumerate() {
                        let l = base + offset;
                        deposit_tile(layout, l, &ppart[l], kpic[l], qm, acc);
                    }
                });
            }
        });
    }

    for l in 0..n {
        let c = layout.decode(l);
        let noff = c.ix as usize * layout.mx;
        let moff = c.iy as usize * layout.my;
        let loff = c.iz as usize * layout.mz;
        let acc = &accs[l];
        for lz in 0..=layout.mz {
            for ly in 0..=layout.my {
                for lx in 0..=layout.mx {
                    let v = acc.data[acc.index(lx, ly, lz)];
                    if v == 0.0 {
                        continue;
                    }
                    *q.get_mut(noff + lx, moff + ly, loff + lz) += v;
                }
            }
        }
    }
}

fn deposit_tile(
    layout: &TileLayout,
    l: usize,
    ppart: &ParticleTile,
    kpic: usize,
    qm: f64,
    acc: &mut TileAccumulator,
) {
    let c = layout.decode(l);
    let noff = c.ix as usize * layout.mx;
    let moff = c.iy as usize * layout.my;
    let loff = c.iz as usize * layout.mz;
    for n in 0..kpic {
        let x = ppart.get(attr::X, n) - noff as f64;
        let y = ppart.get(attr::Y, n) - moff as f64;
        let z = ppart.get(attr::Z, n) - loff as f64;
        let (nx, dx) = split_cell(x);
        let (ny, dy) = split_cell(y);
        let (nz, dz) = split_cell(z);
        assert!(
            nx < layout.mx + 1 && ny < layout.my + 1 && nz < layout.mz + 1,
            "particle in tile {l} outside its owning tile at deposit time (push invariant violated)"
        );
        for (a, wa) in [(0usize, 1.0 - dx), (1, dx)] {
            for (b, wb) in [(0usize, 1.0 - dy), (1, dy)] {
                for (cc, wc) in [(0usize, 1.0 - dz), (1, dz)] {
                    acc.add(nx + a, ny + b, nz + cc, qm * wa * wb * wc);
                }
            }
        }
    }
}

/// Split a local coordinate into its integer cell and fractional offset:
/// `(n, dx) = (floor(x), x - floor(x))`.
#[inline(always)]
fn split_cell(x: f64) -> (usize, f64) {
    let n = x.floor();
    debug_assert!(n >= 0.0, "negative local coordinate at deposit time");
    (n as usize, x - n)
}

/// Sum of all interior grid values of `q` after deposit and guard
/// accumulation; used by callers verifying charge conservation
/// (`Sum q == qm * Sum kpic`).
#[must_use]
pub fn total_charge(q: &Field3) -> f64 {
    q.interior_sum()
}

/// Allocate a zeroed charge field matching `spec`.
#[must_use]
pub fn zero_charge_field(spec: GridSpec) -> Field3 {
    Field3::zeros(spec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::accumulate_guard_scalar;
    use rand::{Rng, SeedableRng};

    fn single_particle_tile(nppmx: usize, x: f64, y: f64, z: f64) -> (ParticleTile, usize) {
        let mut t = ParticleTile::new(nppmx);
        t.set(attr::X, 0, x);
        t.set(attr::Y, 0, y);
        t.set(attr::Z, 0, z);
        (t, 1)
    }

    #[test]
    fn single_particle_deposits_eight_eighths_to_cell_corners() {
        let spec = GridSpec::new(8, 8, 8).unwrap();
        let layout = TileLayout::new(8, 8, 8, 4, 4, 4).unwrap();
        let mut ppart = vec![ParticleTile::new(16); layout.num_tiles()];
        let mut kpic = vec![0usize; layout.num_tiles()];
        // Particle at (3.5, 3.5, 3.5) is owned by the tile covering [0,4)^3.
        let (t, n) = single_particle_tile(16, 3.5, 3.5, 3.5);
        ppart[0] = t;
        kpic[0] = n;
        let mut q = Field3::zeros(spec);
        deposit(&layout, &ppart, &kpic, 1.0, &mut q);
        accumulate_guard_scalar(&mut q);
        let mut total = 0.0;
        for dz in 0..2 {
            for dy in 0..2 {
                for dx in 0..2 {
                    let v = q.get(3 + dx, 3 + dy, 3 + dz);
                    assert!((v - 0.125).abs() < 1e-12, "corner {dx},{dy},{dz} got {v}");
                    total += v;
                }
            }
        }
        assert!((total - 1.0).abs() < 1e-12);
    }

    #[test]
    fn charge_conservation_holds_for_many_particles() {
        let spec = GridSpec::new(8, 8, 8).unwrap();
        let layout = TileLayout::new(8, 8, 8, 4, 4, 4).unwrap();
        let mut ppart = vec![ParticleTile::new(16); layout.num_tiles()];
        let mut kpic = vec![0usize; layout.num_tiles()];
        let mut rng = rand::rngs::StdRng::seed_from_u64(12345);
        let mut total_particles = 0;
        for l in 0..layout.num_tiles() {
            let c = layout.decode(l);
            let (noff, moff, loff) = (
                c.ix as f64 * layout.mx as f64,
                c.iy as f64 * layout.my as f64,
                c.iz as f64 * layout.mz as f64,
            );
            for n in 0..5 {
                ppart[l].set(attr::X, n, noff + rng.gen::<f64>() * layout.mx as f64);
                ppart[l].set(attr::Y, n, moff + rng.gen::<f64>() * layout.my as f64);
                ppart[l].set(attr::Z, n, loff + rng.gen::<f64>() * layout.mz as f64);
            }
            kpic[l] = 5;
            total_particles += 5;
        }
        let mut q = Field3::zeros(spec);
        deposit(&layout, &ppart, &kpic, 2.0, &mut q);
        accumulate_guard_scalar(&mut q);
        let total = total_charge(&q);
        let expected = 2.0 * total_particles as f64;
        assert!((total - expected).abs() < 1e-9, "{total} != {expected}");
    }

    #[test]
    #[cfg(not(target_arch = "wasm32"))]
    fn parallel_deposit_matches_serial_deposit() {
        let spec = GridSpec::new(8, 8, 8).unwrap();
        let layout = TileLayout::new(8, 8, 8, 4, 4, 4).unwrap();
        let mut ppart = vec![ParticleTile::new(16); layout.num_tiles()];
        let mut kpic = vec![0usize; layout.num_tiles()];
        let mut rng = rand::rngs::StdRng::seed_from_u64(777);
        for l in 0..layout.num_tiles() {
            let c = layout.decode(l);
            let (noff, moff, loff) = (
                c.ix as f64 * layout.mx as f64,
                c.iy as f64 * layout.my as f64,
                c.iz as f64 * layout.mz as f64,
            );
            for n in 0..5 {
                ppart[l].set(attr::X, n, noff + rng.gen::<f64>() * layout.mx as f64);
                ppart[l].set(attr::Y, n, moff + rng.gen::<f64>() * layout.my as f64);
                ppart[l].set(attr::Z, n, loff + rng.gen::<f64>() * layout.mz as f64);
            }
            kpic[l] = 5;
        }

        let mut q_serial = Field3::zeros(spec);
        deposit(&layout, &ppart, &kpic, 1.5, &mut q_serial);

        let mut q_parallel = Field3::zeros(spec);
        let mut pool = scoped_threadpool::Pool::new(4);
        deposit_parallel(&layout, &ppart, &kpic, 1.5, &mut q_parallel, &mut pool);

        for (a, b) in q_serial.as_slice().iter().zip(q_parallel.as_slice().iter()) {
            assert!((a - b).abs() < 1e-12, "{a} != {b}");
        }
    }
}
