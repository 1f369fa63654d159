// pic3d - numerical core of a 3D electrostatic particle-in-cell kernel

//! Segmented, per-tile particle storage and the auxiliary bookkeeping
//! structures used by push and reorder, including the `ihole` hole
//! list.

use crate::error::PicError;
use crate::tile::NUM_NEIGHBORS;

/// Number of attributes stored per particle: `(x, y, z, vx, vy, vz)`.
pub const IDIMP: usize = 6;

/// Component index of each particle attribute within a tile's storage.
pub mod attr {
    /// x position.
    pub const X: usize = 0;
    /// y position.
    pub const Y: usize = 1;
    /// z position.
    pub const Z: usize = 2;
    /// x velocity.
    pub const VX: usize = 3;
    /// y velocity.
    pub const VY: usize = 4;
    /// z velocity.
    pub const VZ: usize = 5;
}

/// One tile's worth of particles, stored attribute-major
/// (`ppart[c][n]`) so that a hot loop over `n` reads one attribute of
/// many neighboring particles contiguously — a vectorization-friendly
/// layout.
#[derive(Clone, Debug)]
pub struct ParticleTile {
    /// `idimp` rows of length `nppmx` each.
    data: Vec<Vec<f64>>,
    /// Compile-time upper bound on occupancy; must be a multiple of
    /// [`crate::push::LANES`].
    pub nppmx: usize,
}

impl ParticleTile {
    /// Allocate an empty tile with capacity `nppmx`.
    #[must_use]
    pub fn new(nppmx: usize) -> Self {
        Self { data: vec![vec![0.0; nppmx]; IDIMP], nppmx }
    }

    /// Read attribute `c` of particle `n`.
    #[must_use]
    #[inline(always)]
    pub fn get(&self, c: usize, n: usize) -> f64 {
        self.data[c][n]
    }

    /// Write attribute `c` of particle `n`.
    #[inline(always)]
    pub fn set(&mut self, c: usize, n: usize, v: f64) {
        self.data[c][n] = v;
    }

    /// Copy all `IDIMP` attributes of particle `src` into particle `dst`
    /// (used by reorder to move particles between slots).
    pub fn copy_within(&mut self, src: usize, dst: usize) {
        for c in 0..IDIMP {
            self.data[c][dst] = self.data[c][src];
        }
    }

    /// Copy particle `src` of `other` into particle `dst` of `self`.
    pub fn copy_from(&mut self, dst: usize, other: &ParticleTile, src: usize) {
        for c in 0..IDIMP {
            self.data[c][dst] = other.data[c][src];
        }
    }

    /// Row for attribute `c`, read-only.
    #[must_use]
    pub fn row(&self, c: usize) -> &[f64] {
        &self.data[c]
    }

    /// Row for attribute `c`, mutable.
    pub fn row_mut(&mut self, c: usize) -> &mut [f64] {
        &mut self.data[c]
    }
}

/// A single departure record: the local index (within its tile, before
/// removal) of the particle that left, and the direction code (`1..=26`)
/// it left in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HoleEntry {
    /// Local index of the departing particle at classification time.
    pub local_index: u32,
    /// Direction code (`1..=26`) it departed in.
    pub direction: u8,
}

/// The departure list for one tile.
///
/// This keeps an explicit `count`/`overflow` pair instead of the wire
/// convention of packing the (possibly negated) count into entry 0 of a
/// flat array. The wire-compatible encoding, when needed, is
/// `count.unsigned_abs()` with sign given by `overflow`.
#[derive(Clone, Debug, Default)]
pub struct Ihole {
    /// Number of departures recorded (excludes any dropped on overflow).
    pub count: i32,
    /// Set once the tile's hole capacity (`ntmax`) was exceeded.
    pub overflow: bool,
    /// The departure records themselves, in the order they were found.
    pub entries: Vec<HoleEntry>,
}

impl Ihole {
    /// An empty departure list with room to record up to `ntmax` holes
    /// before flagging overflow.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a departure, honoring the `ntmax` capacity. Returns `false`
    /// (and sets `overflow`) if the list was already full.
    pub fn push(&mut self, local_index: u32, direction: u8, ntmax: usize) -> bool {
        if self.entries.len() >= ntmax {
            self.overflow = true;
            return false;
        }
        self.entries.push(HoleEntry { local_index, direction });
        self.count += 1;
        true
    }

    /// Clear all records (start of a new classify pass).
    pub fn clear(&mut self) {
        self.count = 0;
        self.overflow = false;
        self.entries.clear();
    }
}

/// Per-direction departure counts for one tile, doubling (after the
/// phase-2 prefix scan) as write offsets into that tile's outbound
/// buffer. Indexed `0..=25` corresponding to direction codes `1..=26`.
#[derive(Clone, Copy, Debug, Default)]
pub struct Ncl {
    counts: [i32; NUM_NEIGHBORS],
}

impl Ncl {
    /// All-zero counts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count (or, after the phase-2 scan, offset) for direction code `d`
    /// (`1..=26`).
    #[must_use]
    #[inline(always)]
    pub fn get(&self, d: u8) -> i32 {
        self.counts[usize::from(d) - 1]
    }

    /// Mutable access to the count/offset for direction code `d`.
    #[inline(always)]
    pub fn get_mut(&mut self, d: u8) -> &mut i32 {
        &mut self.counts[usize::from(d) - 1]
    }

    /// The conventional `ncl[-1] = 0` start boundary used by reorder
    /// phase 3: offset `0` for `d == 0`, `self.get(d)` otherwise.
    #[must_use]
    pub fn start_offset(&self, d: u8) -> i32 {
        if d == 0 { 0 } else { self.counts[usize::from(d) - 1] }
    }

    /// Reset all counts to zero.
    pub fn clear(&mut self) {
        self.counts = [0; NUM_NEIGHBORS];
    }

    /// In-place exclusive prefix scan over the 26 direction slots.
    /// Returns the total number of departures (`off[25] + count[25]`
    /// before scanning).
    pub fn exclusive_scan(&mut self) -> i32 {
        let mut total = 0;
        for c in &mut self.counts {
            let count = *c;
            *c = total;
            total += count;
        }
        total
    }
}

/// Outbound particle buffer for one tile (`ppbuff`), populated during
/// reorder phase 2 and consumed during phase 3.
#[derive(Clone, Debug)]
pub struct OutBuffer {
    tile: ParticleTile,
    /// Capacity in particles.
    pub npbmx: usize,
}

impl OutBuffer {
    /// Allocate an empty outbound buffer with capacity `npbmx`.
    #[must_use]
    pub fn new(npbmx: usize) -> Self {
        Self { tile: ParticleTile::new(npbmx), npbmx }
    }

    /// The underlying particle storage.
    #[must_use]
    pub fn tile(&self) -> &ParticleTile {
        &self.tile
    }

    /// Mutable access to the underlying particle storage.
    pub fn tile_mut(&mut self) -> &mut ParticleTile {
        &mut self.tile
    }
}

/// Validate that `nppmx` (or another SIMD-blocked bound) is a multiple
/// of `lanes`.
///
/// # Errors
/// Returns [`PicError::NotLaneAligned`] otherwise.
pub fn check_lane_aligned(name: &'static str, value: usize, lanes: usize) -> Result<(), PicError> {
    if value % lanes != 0 {
        return Err(PicError::NotLaneAligned { name, value, lanes });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ncl_exclusive_scan_matches_manual_prefix_sum() {
        let mut ncl = Ncl::new();
        let counts = [3, 0, 1, 2, 0, 5];
        for (i, &c) in counts.iter().enumerate() {
            *ncl.get_mut((i + 1) as u8) = c;
        }
        let total = ncl.exclusive_scan();
        assert_eq!(total, counts.iter().sum::<i32>());
        let mut running = 0;
        for (i, &c) in counts.iter().enumerate() {
            assert_eq!(ncl.get((i + 1) as u8), running);
            running += c;
        }
    }

    #[test]
    fn ihole_flags_overflow_and_keeps_earlier_entries() {
        let mut ih = Ihole::new();
        assert!(ih.push(1, 5, 2));
        assert!(ih.push(2, 6, 2));
        assert!(!ih.push(3, 7, 2));
        assert!(ih.overflow);
        assert_eq!(ih.entries.len(), 2);
        assert_eq!(ih.count, 2);
    }

    #[test]
    fn particle_tile_copy_within_moves_all_attributes() {
        let mut t = ParticleTile::new(4);
        for c in 0..IDIMP {
            t.set(c, 0, (c + 1) as f64);
        }
        t.copy_within(0, 2);
        for c in 0..IDIMP {
            assert_eq!(t.get(c, 2), (c + 1) as f64);
        }
    }
}
