// pic3d - numerical core of a 3D electrostatic particle-in-cell kernel

//! Particle reorder: after a with-flagging push, particles that crossed
//! a tile boundary are buffered, exchanged with the 26 neighbor tiles,
//! and reinserted into the holes left behind.
//!
//! Three phases:
//!
//! 1. **Classify** (only in [`reorder`]; skipped by [`reorder_fast`],
//!    which assumes `ncl`/`ihole` were already produced by
//!    [`crate::push::push_with_flag`]).
//! 2. **Buffer out**: exclusive prefix scan of `ncl`, then each tile's
//!    departing particles are copied into its own `ppbuff`.
//! 3. **Insert in**: each destination tile walks its 26 source
//!    directions and pulls particles out of the matching neighbor's
//!    `ppbuff`, filling holes first and appending past `kpic` otherwise;
//!    leftover holes are closed by swapping in particles from the tail.
//!
//! Phases 1 and 2 only ever touch their own tile's `ncl`/`ihole`/
//! `ppbuff`; phase 3 only ever writes its own tile's `ppart` while
//! reading (never mutating) its neighbors' `ppbuff`. This makes all
//! three phases embarrassingly parallel across tiles, with a barrier
//! required only between phase 2 and phase 3 (so that every `ppbuff` is
//! fully populated before any tile starts reading its neighbors').

use crate::helpers::ceil_div;
use crate::particles::{Ihole, Ncl, OutBuffer, ParticleTile};
use crate::push::classify_departure;
use crate::tile::TileLayout;

/// Result of a reorder call.
///
/// `irc` is the out-of-band capacity-overflow signal: a non-zero value
/// means some tile's hole list, outbound buffer, or
/// destination occupancy was exceeded, and the caller must retry with
/// larger `ntmax`/`npbmx`/`nppmx`. The reorder does not unwind partial
/// work on overflow; it finishes the step with whatever it could place
/// and reports the fault.
#[derive(Clone, Copy, Debug, Default)]
pub struct ReorderReport {
    /// `0` if nothing overflowed; otherwise the largest overflow count
    /// observed across tiles and phases.
    pub irc: i32,
}

/// Full reorder: classify departures from scratch, then buffer-out and
/// insert-in. Use this when `ncl`/`ihole` were not already produced by
/// [`crate::push::push_with_flag`] in the same step.
pub fn reorder(
    layout: &TileLayout,
    ppart: &mut [ParticleTile],
    kpic: &mut [usize],
    ncl: &mut [Ncl],
    ihole: &mut [Ihole],
    ppbuff: &mut [OutBuffer],
    ntmax: usize,
) -> ReorderReport {
    let mut irc = classify(layout, ppart, kpic, ncl, ihole, ntmax);
    irc = irc.max(reorder_fast(layout, ppart, kpic, ncl, ihole, ppbuff).irc);
    ReorderReport { irc }
}

/// Reorder using `ncl`/`ihole` already populated by a with-flagging
/// push, skipping the classify phase.
pub fn reorder_fast(
    layout: &TileLayout,
    ppart: &mut [ParticleTile],
    kpic: &mut [usize],
    ncl: &mut [Ncl],
    ihole: &mut [Ihole],
    ppbuff: &mut [OutBuffer],
) -> ReorderReport {
    let n = layout.num_tiles();
    assert_eq!(ppart.len(), n);
    assert_eq!(kpic.len(), n);
    assert_eq!(ncl.len(), n);
    assert_eq!(ihole.len(), n);
    assert_eq!(ppbuff.len(), n);

    let irc_buffer = buffer_out(ppart, ncl, ihole, ppbuff);
    // Barrier: every tile's ppbuff must be fully populated (and every
    // tile's ncl turned from counts into scan offsets) before any tile
    // starts phase 3, since phase 3 reads neighbors' ppbuff/ncl.
    let irc_insert = insert_in(layout, ppart, kpic, ncl, ihole, ppbuff);

    ReorderReport { irc: irc_buffer.max(irc_insert) }
}

/// Tile-parallel counterpart of [`reorder_fast`]. Phase 2 and phase 3
/// each run as their own `thread_pool.scoped` fork/join; the pool's
/// `.scoped` call returning is the barrier needed between them, so
/// every tile's `ppbuff` is guaranteed fully populated before phase 3
/// starts reading it.
#[cfg(not(target_arch = "wasm32"))]
pub fn reorder_fast_parallel(
    layout: &TileLayout,
    ppart: &mut [ParticleTile],
    kpic: &mut [usize],
    ncl: &mut [Ncl],
    ihole: &mut [Ihole],
    ppbuff: &mut [OutBuffer],
    thread_pool: &mut scoped_threadpool::Pool,
) -> ReorderReport {
    let n = layout.num_tiles();
    assert_eq!(ppart.len(), n);
    assert_eq!(kpic.len(), n);
    assert_eq!(ncl.len(), n);
    assert_eq!(ihole.len(), n);
    assert_eq!(ppbuff.len(), n);

    let num_threads = thread_pool.thread_count() as usize;
    if num_threads < 2 {
        return reorder_fast(layout, ppart, kpic, ncl, ihole, ppbuff);
    }

    let chunk_size = ceil_div(n, num_threads);

    // Phase 2: each tile only touches its own ncl/ppbuff entry.
    let num_chunks = ceil_div(n, chunk_size);
    let mut irc_slots_buffer = vec![0i32; num_chunks];
    thread_pool.scoped(|s| {
        let ppart_chunks = ppart.chunks(chunk_size);
        let ncl_chunks = ncl.chunks_mut(chunk_size);
        let ihole_chunks = ihole.chunks(chunk_size);
        let ppbuff_chunks = ppbuff.chunks_mut(chunk_size);
        for (((ppart_chunk, ncl_chunk), ihole_chunk), (ppbuff_chunk, irc_out)) in ppart_chunks
            .zip(ncl_chunks)
            .zip(ihole_chunks)
            .zip(ppbuff_chunks.zip(irc_slots_buffer.iter_mut()))
        {
            s.execute(move || {
                let mut chunk_irc = 0i32;
                for (((ppart_l, ncl_l), ihole_l), ppbuff_l) in ppart_chunk
                    .iter()
                    .zip(ncl_chunk.iter_mut())
                    .zip(ihole_chunk.iter())
                    .zip(ppbuff_chunk.iter_mut())
                {
                    chunk_irc = chunk_irc.max(buffer_out_tile(ppart_l, ncl_l, ihole_l, ppbuff_l));
                }
                *irc_out = chunk_irc;
            });
        }
    });
    let irc_buffer = irc_slots_buffer.iter().copied().max().unwrap_or(0);

    // Barrier: thread_pool.scoped above has already joined every worker.

    // Phase 3: each destination tile only writes its own ppart/kpic,
    // but reads every neighbor's (shared, immutable) ncl/ppbuff.
    let num_chunks = ceil_div(n, chunk_size);
    let mut irc_slots = vec![0i32; num_chunks];
    thread_pool.scoped(|s| {
        let ppart_chunks = ppart.chunks_mut(chunk_size);
        let kpic_chunks = kpic.chunks_mut(chunk_size);
        let ihole_chunks = ihole.chunks(chunk_size);
        for (i, (((ppart_chunk, kpic_chunk), ihole_chunk), irc_out)) in ppart_chunks
            .zip(kpic_chunks)
            .zip(ihole_chunks)
            .zip(irc_slots.iter_mut())
            .enumerate()
        {
            let base = i * chunk_size;
            let ncl_ref: &[Ncl] = ncl;
            let ppbuff_ref: &[OutBuffer] = ppbuff;
            s.execute(move || {
                let mut chunk_irc = 0i32;
                for (offset, ((ppart_l, kpic_l), ihole_l)) in ppart_chunk
                    .iter_mut()
                    .zip(kpic_chunk.iter_mut())
                    .zip(ihole_chunk.iter())
                    .enumerate()
                {
                    let l = base + offset;
                    chunk_irc = chunk_irc.max(insert_in_tile(layout, l, ppart_l, kpic_l, ncl_ref, ihole_l, ppbuff_ref));
                }
                *irc_out = chunk_irc;
            });
        }
    });
    let irc_insert = irc_slots.iter().copied().max().unwrap_or(0);

    ReorderReport { irc: irc_buffer.max(irc_insert) }
}

/// Phase 1: classify every live particle's departure into `ncl`/`ihole`,
/// applying the global periodic wrap to its position where needed.
/// Returns the largest overflow count observed.
fn classify(
    layout: &TileLayout,
    ppart: &mut [ParticleTile],
    kpic: &[usize],
    ncl: &mut [Ncl],
    ihole: &mut [Ihole],
    ntmax: usize,
) -> i32 {
    for l in 0..layout.num_tiles() {
        ncl[l].clear();
        ihole[l].clear();
    }
    for l in 0..layout.num_tiles() {
        let c = layout.decode(l);
        let noff = c.ix as usize * layout.mx;
        let moff = c.iy as usize * layout.my;
        let loff = c.iz as usize * layout.mz;
        for n in 0..kpic[l] {
            let x = ppart[l].get(crate::particles::attr::X, n);
            let y = ppart[l].get(crate::particles::attr::Y, n);
            let z = ppart[l].get(crate::particles::attr::Z, n);
            classify_departure(layout, l, n, noff, moff, loff, x, y, z, &mut ncl[l], &mut ihole[l], ntmax);
        }
    }
    ihole
        .iter()
        .filter(|h| h.overflow)
        .map(|h| h.entries.len() as i32)
        .max()
        .unwrap_or(0)
}

/// Phase 2: exclusive-scan each tile's `ncl`, then copy every departing
/// particle (per `ihole`) into its tile's outbound buffer at the
/// resulting offset. On exit, `ncl[l].get(d)` holds the *end* offset
/// (one past the last slot) for direction `d`.
fn buffer_out(
    ppart: &[ParticleTile],
    ncl: &mut [Ncl],
    ihole: &[Ihole],
    ppbuff: &mut [OutBuffer],
) -> i32 {
    let mut irc = 0;
    for l in 0..ppart.len() {
        irc = irc.max(buffer_out_tile(&ppart[l], &mut ncl[l], &ihole[l], &mut ppbuff[l]));
    }
    irc
}

/// Phase 2 for a single tile: scan its `ncl`, then copy its departing
/// particles into its own outbound buffer. Touches only this tile's
/// `ncl`/`ppbuff` entry, so it is safe to call concurrently for
/// different tiles.
fn buffer_out_tile(ppart_l: &ParticleTile, ncl_l: &mut Ncl, ihole_l: &Ihole, ppbuff_l: &mut OutBuffer) -> i32 {
    ncl_l.exclusive_scan();
    let npbmx = ppbuff_l.npbmx;
    let mut overflowed = 0i32;
    for entry in &ihole_l.entries {
        let off = ncl_l.get_mut(entry.direction);
        if (*off as usize) >= npbmx {
            overflowed += 1;
            continue;
        }
        let dst = *off as usize;
        *off += 1;
        ppbuff_l.tile_mut().copy_from(dst, ppart_l, entry.local_index as usize);
    }
    if overflowed > 0 {
        ihole_l.entries.len() as i32
    } else {
        0
    }
}

/// Phase 3: for every destination tile, walk its 26 source directions,
/// pull arriving particles out of the matching neighbor's `ppbuff`
/// (reading the *end* offsets `buffer_out` left in that neighbor's
/// `ncl`), fill holes first, append past `kpic` otherwise, then close
/// any unfilled holes by swapping particles in from the tile's tail.
fn insert_in(
    layout: &TileLayout,
    ppart: &mut [ParticleTile],
    kpic: &mut [usize],
    ncl: &[Ncl],
    ihole: &[Ihole],
    ppbuff: &[OutBuffer],
) -> i32 {
    let n = layout.num_tiles();
    let mut irc = 0;
    for l in 0..n {
        irc = irc.max(insert_in_tile(layout, l, &mut ppart[l], &mut kpic[l], ncl, &ihole[l], ppbuff));
    }
    irc
}

/// Phase 3 for a single destination tile `l`: walk its 26 source
/// directions, pull arriving particles out of the matching neighbors'
/// `ppbuff` (read-only here — every neighbor's buffer was already fully
/// populated by phase 2, across the barrier), fill holes first, append
/// past `kpic` otherwise, then close leftover holes from the tail.
/// Writes only `ppart[l]`/`kpic[l]`, so concurrent calls for different
/// `l` are safe: each destination tile writes only to its own `ppart`.
fn insert_in_tile(
    layout: &TileLayout,
    l: usize,
    ppart_l: &mut ParticleTile,
    kpic_l: &mut usize,
    ncl: &[Ncl],
    ihole_l: &Ihole,
    ppbuff: &[OutBuffer],
) -> i32 {
    let mut irc = 0;
    let mut hole_cursor = 0usize;
    let holes = &ihole_l.entries;
    let nppmx = ppart_l.nppmx;

    for ii in 1..=26u8 {
        let src = layout.source_tile(l, ii);
        let start = ncl[src].start_offset(ii - 1);
        let end = ncl[src].get(ii);
        if end <= start {
            continue;
        }
        for off in start..end {
            let use_hole = hole_cursor < holes.len();
            let dst_index = if use_hole {
                holes[hole_cursor].local_index as usize
            } else {
                *kpic_l
            };
            if dst_index >= nppmx {
                // Destination tile is full: don't consume the slot
                // (kpic must not grow past nppmx) but still report
                // the fault via irc — one count per arrival that
                // overflowed, so the caller knows how much to grow
                // `nppmx` by before retrying.
                irc += 1;
                continue;
            }
            if use_hole {
                hole_cursor += 1;
            } else {
                *kpic_l += 1;
            }
            ppart_l.copy_from(dst_index, ppbuff[src].tile(), off as usize);
        }
    }

    if hole_cursor < holes.len() {
        close_remaining_holes(ppart_l, kpic_l, holes, hole_cursor);
    }
    irc
}

/// Close the holes in `holes[cursor..]` by swapping in particles from
/// the tile's tail: scan the hole list from the top and the particle
/// tail from the bottom, skipping
/// any tail index that is itself a scheduled hole, until every
/// remaining hole is either filled or past the shrunk `kpic`.
///
/// `kpic` shrinks by the *net* departures, `holes.len() - cursor`, not
/// the gross count: the first `cursor` holes were already closed by
/// incoming arrivals during [`insert_in_tile`] and must not be
/// double-counted here (spec §4.E phase 3: "`kpic[l]` is decremented by
/// the number of net departures").
fn close_remaining_holes(tile: &mut ParticleTile, kpic: &mut usize, holes: &[crate::particles::HoleEntry], cursor: usize) {
    let remaining = &holes[cursor..];
    let net_departed = holes.len() - cursor;
    let new_kpic = kpic.saturating_sub(net_departed);

    // Index set of local indices that departed (so the tail scan can
    // skip slots that are holes themselves rather than live particles).
    let departed_set: std::collections::HashSet<usize> =
        holes.iter().map(|h| h.local_index as usize).collect();

    let mut tail = *kpic;
    for hole in remaining.iter().rev() {
        let target = hole.local_index as usize;
        if target >= new_kpic {
            // This hole already lies past the shrunk tail; nothing to fill.
            continue;
        }
        loop {
            tail -= 1;
            if !departed_set.contains(&tail) {
                break;
            }
        }
        tile.copy_within(tail, target);
    }
    *kpic = new_kpic;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particles::attr;
    #[cfg(not(target_arch = "wasm32"))]
    use rand::{Rng, SeedableRng};

    fn layout_2x1x1(mx: usize, nppmx: usize) -> (TileLayout, Vec<ParticleTile>, Vec<usize>) {
        let layout = TileLayout::new(2 * mx, mx, mx, mx, mx, mx).unwrap();
        let ppart = vec![ParticleTile::new(nppmx); layout.num_tiles()];
        let kpic = vec![0usize; layout.num_tiles()];
        (layout, ppart, kpic)
    }

    #[test]
    fn particle_count_is_conserved_across_reorder() {
        let (layout, mut ppart, mut kpic) = layout_2x1x1(4, 16);
        // Tile 0 spans x in [0,4); place 3 particles near its +x edge so
        // they cross into tile 1.
        for n in 0..3 {
            ppart[0].set(attr::X, n, 3.9);
            ppart[0].set(attr::Y, n, 1.0 + n as f64 * 0.1);
            ppart[0].set(attr::Z, n, 1.0);
        }
        kpic[0] = 3;
        let mut ncl = vec![Ncl::new(); layout.num_tiles()];
        let mut ihole = vec![Ihole::new(); layout.num_tiles()];
        let mut ppbuff = vec![OutBuffer::new(16), OutBuffer::new(16)];

        // Push them just past the boundary without going through push::push.
        for n in 0..3 {
            ppart[0].set(attr::X, n, 4.1);
        }

        let total_before: usize = kpic.iter().sum();
        let report = reorder(&layout, &mut ppart, &mut kpic, &mut ncl, &mut ihole, &mut ppbuff, 16);
        assert_eq!(report.irc, 0);
        let total_after: usize = kpic.iter().sum();
        assert_eq!(total_before, total_after);
        assert_eq!(kpic[0], 0);
        assert_eq!(kpic[1], 3);
    }

    #[test]
    fn positions_land_inside_destination_tile_after_reorder() {
        let (layout, mut ppart, mut kpic) = layout_2x1x1(4, 16);
        for n in 0..2 {
            ppart[0].set(attr::X, n, 4.2);
            ppart[0].set(attr::Y, n, 2.0);
            ppart[0].set(attr::Z, n, 2.0);
        }
        kpic[0] = 2;
        let mut ncl = vec![Ncl::new(); layout.num_tiles()];
        let mut ihole = vec![Ihole::new(); layout.num_tiles()];
        let mut ppbuff = vec![OutBuffer::new(16), OutBuffer::new(16)];
        reorder(&layout, &mut ppart, &mut kpic, &mut ncl, &mut ihole, &mut ppbuff, 16);
        for n in 0..kpic[1] {
            let x = ppart[1].get(attr::X, n);
            assert!((4.0..8.0).contains(&x), "x={x} not in destination tile");
        }
    }

    #[test]
    fn overflow_past_capacity_is_reported_via_irc() {
        // 16 particles all sent in the same direction with a destination
        // tile of capacity 16 that is already full: every arrival must
        // overflow nppmx.
        let layout = TileLayout::new(8, 4, 4, 4, 4, 4).unwrap();
        let n_tiles = layout.num_tiles();
        let mut ppart = vec![ParticleTile::new(16); n_tiles];
        let mut kpic = vec![0usize; n_tiles];
        kpic[1] = 16; // destination tile already full
        for n in 0..16 {
            ppart[0].set(attr::X, n, 4.1);
            ppart[0].set(attr::Y, n, 1.0);
            ppart[0].set(attr::Z, n, 1.0);
        }
        kpic[0] = 16;
        let mut ncl = vec![Ncl::new(); n_tiles];
        let mut ihole = vec![Ihole::new(); n_tiles];
        let mut ppbuff: Vec<OutBuffer> = (0..n_tiles).map(|_| OutBuffer::new(32)).collect();
        let report = reorder(&layout, &mut ppart, &mut kpic, &mut ncl, &mut ihole, &mut ppbuff, 32);
        assert!(report.irc > 0, "expected overflow to be reported");
        assert_eq!(kpic[1], 16, "destination tile occupancy must not change on overflow");
    }

    #[test]
    #[cfg(not(target_arch = "wasm32"))]
    fn parallel_reorder_fast_matches_serial_reorder_fast() {
        let layout = TileLayout::new(16, 4, 4, 4, 4, 4).unwrap();
        let n_tiles = layout.num_tiles();
        let nppmx = 32;

        let mut rng = rand::rngs::StdRng::seed_from_u64(42);

        let mut build = |rng: &mut rand::rngs::StdRng| {
            let mut ppart = vec![ParticleTile::new(nppmx); n_tiles];
            let mut kpic = vec![0usize; n_tiles];
            for l in 0..n_tiles {
                let c = layout.decode(l);
                let x0 = c.ix as f64 * 4.0;
                let y0 = c.iy as f64 * 4.0;
                let z0 = c.iz as f64 * 4.0;
                let count = 10;
                for n in 0..count {
                    // Bias positions near tile edges so a good fraction
                    // of particles actually depart their home tile.
                    ppart[l].set(attr::X, n, x0 + rng.gen_range(-0.5..4.5));
                    ppart[l].set(attr::Y, n, y0 + rng.gen_range(-0.5..4.5));
                    ppart[l].set(attr::Z, n, z0 + rng.gen_range(-0.5..4.5));
                    ppart[l].set(attr::VX, n, 0.0);
                    ppart[l].set(attr::VY, n, 0.0);
                    ppart[l].set(attr::VZ, n, 0.0);
                }
                kpic[l] = count;
            }
            (ppart, kpic)
        };

        let (mut ppart_serial, mut kpic_serial) = build(&mut rng);
        let (mut ppart_par, mut kpic_par) = build(&mut rng);

        let mut ncl_serial = vec![Ncl::new(); n_tiles];
        let mut ihole_serial = vec![Ihole::new(); n_tiles];
        let mut ppbuff_serial: Vec<OutBuffer> = (0..n_tiles).map(|_| OutBuffer::new(64)).collect();
        let irc_serial = classify(&layout, &mut ppart_serial, &kpic_serial, &mut ncl_serial, &mut ihole_serial, nppmx);
        assert_eq!(irc_serial, 0);
        let report_serial =
            reorder_fast(&layout, &mut ppart_serial, &mut kpic_serial, &mut ncl_serial, &mut ihole_serial, &mut ppbuff_serial);

        let mut ncl_par = vec![Ncl::new(); n_tiles];
        let mut ihole_par = vec![Ihole::new(); n_tiles];
        let mut ppbuff_par: Vec<OutBuffer> = (0..n_tiles).map(|_| OutBuffer::new(64)).collect();
        let irc_par = classify(&layout, &mut ppart_par, &kpic_par, &mut ncl_par, &mut ihole_par, nppmx);
        assert_eq!(irc_par, 0);
        let mut pool = scoped_threadpool::Pool::new(4);
        let report_par = reorder_fast_parallel(
            &layout,
            &mut ppart_par,
            &mut kpic_par,
            &mut ncl_par,
            &mut ihole_par,
            &mut ppbuff_par,
            &mut pool,
        );

        assert_eq!(report_serial.irc, report_par.irc);
        assert_eq!(kpic_serial, kpic_par);
        for l in 0..n_tiles {
            for n in 0..kpic_serial[l] {
                for a in [attr::X, attr::Y, attr::Z, attr::VX, attr::VY, attr::VZ] {
                    assert!(
                        (ppart_serial[l].get(a, n) - ppart_par[l].get(a, n)).abs() < 1e-12,
                        "tile {l} particle {n} attr {a:?} mismatch"
                    );
                }
            }
        }
    }
}
