// pic3d - numerical core of a 3D electrostatic particle-in-cell kernel

//! `Simulation`: the in-core orchestrator that sequences one full time
//! step: Push -> Reorder -> Deposit -> Guard-accumulate -> FFT_fwd ->
//! Poisson -> FFT_inv -> Guard-replicate -> (back to Push).
//!
//! This is the one place that sequences the hot-loop stages behind a
//! single call, while the actual particle sampling, I/O, and timing
//! stay with the external driver.

use tracing::info_span;

#[cfg(not(target_arch = "wasm32"))]
use crate::deposit::deposit_parallel;
use crate::deposit::deposit;
use crate::fft::{fft_scalar_forward, fft_scalar_inverse, fft_vector_inverse, FftTables};
use crate::grid::{accumulate_guard_scalar, replicate_guard_vector, Field3, Field4, GridSpec};
use crate::particles::{Ihole, Ncl, OutBuffer, ParticleTile};
use crate::poisson::{init_form_factor, solve, FormFactor, PoissonParams};
#[cfg(not(target_arch = "wasm32"))]
use crate::push::push_with_flag_parallel;
#[cfg(target_arch = "wasm32")]
use crate::push::push_with_flag;
use crate::push::PushParams;
#[cfg(not(target_arch = "wasm32"))]
use crate::reorder::reorder_fast_parallel;
#[cfg(target_arch = "wasm32")]
use crate::reorder::reorder_fast;
use crate::tile::TileLayout;

/// Everything the core needs to run one time step, owned in one place
/// so a driver only has to call [`Simulation::step`].
pub struct Simulation {
    grid: GridSpec,
    layout: TileLayout,
    tables: FftTables,
    ffc: FormFactor,
    ppart: Vec<ParticleTile>,
    kpic: Vec<usize>,
    ncl: Vec<Ncl>,
    ihole: Vec<Ihole>,
    ppbuff: Vec<OutBuffer>,
    q: Field3,
    fxyz: Field4,
    ntmax: usize,
    qm: f64,
    push_params: PushParams,
    poisson_params: PoissonParams,
    #[cfg(not(target_arch = "wasm32"))]
    thread_pool: scoped_threadpool::Pool,
}

/// Energies accumulated over the most recent [`Simulation::step`] call.
#[derive(Clone, Copy, Debug, Default)]
pub struct StepEnergies {
    /// Kinetic energy from the particle push.
    pub ek: f64,
    /// Field energy from the Poisson solve.
    pub we: f64,
}

/// Out-of-band capacity signal from the most recent step: nonzero
/// means the caller should retry the step with larger
/// `ntmax`/`npbmx`/`nppmx`.
pub type StepIrc = i32;

impl Simulation {
    /// Build a simulation over a logical grid `(nx, ny, nz)` tiled into
    /// `(mx, my, mz)`-sized tiles, with one empty particle tile per grid
    /// tile.
    ///
    /// `num_threads` sizes the internal tile-parallel thread pool (spec
    /// §5 "fork/join over tiles"); `1` runs every stage serially. Not
    /// available on `wasm32`, where threading is not supported yet and
    /// every stage always runs serially regardless of this argument.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        grid: GridSpec,
        layout: TileLayout,
        nppmx: usize,
        npbmx: usize,
        ntmax: usize,
        qm: f64,
        push_params: PushParams,
        poisson_params: PoissonParams,
        #[allow(unused_variables)] num_threads: usize,
    ) -> Self {
        let n = layout.num_tiles();
        let tables = FftTables::new(grid.nx, grid.ny, grid.nz)
            .expect("grid dimensions already validated as powers of two by GridSpec::new");
        let ffc = init_form_factor(grid.nx, grid.ny, grid.nz, poisson_params);
        Self {
            grid,
            layout,
            tables,
            ffc,
            ppart: vec![ParticleTile::new(nppmx); n],
            kpic: vec![0; n],
            ncl: vec![Ncl::new(); n],
            ihole: vec![Ihole::new(); n],
            ppbuff: (0..n).map(|_| OutBuffer::new(npbmx)).collect(),
            q: Field3::zeros(grid),
            fxyz: Field4::zeros(grid),
            ntmax,
            qm,
            push_params,
            poisson_params,
            #[cfg(not(target_arch = "wasm32"))]
            thread_pool: scoped_threadpool::Pool::new(num_threads.max(1) as u32),
        }
    }

    /// Per-tile particle storage, read-only.
    #[must_use]
    pub fn ppart(&self) -> &[ParticleTile] {
        &self.ppart
    }

    /// Per-tile particle storage, mutable (for seeding the initial
    /// population; the driver's responsibility).
    pub fn ppart_mut(&mut self) -> &mut [ParticleTile] {
        &mut self.ppart
    }

    /// Live particle counts per tile.
    #[must_use]
    pub fn kpic(&self) -> &[usize] {
        &self.kpic
    }

    /// Live particle counts per tile, mutable.
    pub fn kpic_mut(&mut self) -> &mut [usize] {
        &mut self.kpic
    }

    /// Total live particle count across all tiles.
    #[must_use]
    pub fn total_particles(&self) -> usize {
        self.kpic.iter().sum()
    }

    /// The tile layout this simulation was built with.
    #[must_use]
    pub fn layout(&self) -> &TileLayout {
        &self.layout
    }

    /// The grid spec this simulation was built with.
    #[must_use]
    pub fn grid(&self) -> GridSpec {
        self.grid
    }

    /// Run one full time step of the pipeline: Push(with-flag) ->
    /// Reorder -> Deposit -> Guard-accumulate -> FFT_fwd -> Poisson ->
    /// FFT_inv -> Guard-replicate.
    ///
    /// Returns the accumulated energies and the out-of-band `irc`
    /// signal; a nonzero `irc` means the caller should resize
    /// `ntmax`/`npbmx`/`nppmx` and retry — the step still runs to
    /// completion either way, with no mid-stage cancellation.
    pub fn step(&mut self) -> (StepEnergies, StepIrc) {
        let step_span = info_span!("pic3d::step");
        let _enter = step_span.enter();

        let push_span = info_span!("pic3d::push");
        let push_report = {
            let _enter = push_span.enter();
            #[cfg(not(target_arch = "wasm32"))]
            {
                push_with_flag_parallel(
                    &self.layout,
                    &mut self.ppart,
                    &self.kpic,
                    &self.fxyz,
                    self.push_params,
                    &mut self.ncl,
                    &mut self.ihole,
                    self.ntmax,
                    &mut self.thread_pool,
                )
            }
            #[cfg(target_arch = "wasm32")]
            {
                push_with_flag(
                    &self.layout,
                    &mut self.ppart,
                    &self.kpic,
                    &self.fxyz,
                    self.push_params,
                    &mut self.ncl,
                    &mut self.ihole,
                    self.ntmax,
                )
            }
        };
        drop(push_span);

        let reorder_span = info_span!("pic3d::reorder");
        let reorder_report = {
            let _enter = reorder_span.enter();
            #[cfg(not(target_arch = "wasm32"))]
            {
                reorder_fast_parallel(
                    &self.layout,
                    &mut self.ppart,
                    &mut self.kpic,
                    &mut self.ncl,
                    &mut self.ihole,
                    &mut self.ppbuff,
                    &mut self.thread_pool,
                )
            }
            #[cfg(target_arch = "wasm32")]
            {
                reorder_fast(
                    &self.layout,
                    &mut self.ppart,
                    &mut self.kpic,
                    &mut self.ncl,
                    &mut self.ihole,
                    &mut self.ppbuff,
                )
            }
        };
        drop(reorder_span);

        let deposit_span = info_span!("pic3d::deposit");
        {
            let _enter = deposit_span.enter();
            self.q.clear();
            #[cfg(not(target_arch = "wasm32"))]
            deposit_parallel(&self.layout, &self.ppart, &self.kpic, self.qm, &mut self.q, &mut self.thread_pool);
            #[cfg(target_arch = "wasm32")]
            deposit(&self.layout, &self.ppart, &self.kpic, self.qm, &mut self.q);
            accumulate_guard_scalar(&mut self.q);
        }
        drop(deposit_span);

        let field_span = info_span!("pic3d::field_solve");
        let we = {
            let _enter = field_span.enter();
            let qhat = fft_scalar_forward(&self.q, &self.tables);
            let (fhat, we) = solve(&qhat, &self.ffc);
            fft_vector_inverse(&fhat, &self.tables, &mut self.fxyz);
            replicate_guard_vector(&mut self.fxyz);
            we
        };
        drop(field_span);

        let irc = push_report.irc.max(reorder_report.irc);
        (StepEnergies { ek: push_report.ek, we }, irc)
    }

    /// Re-run only the field solve (charge already deposited): useful
    /// for the initial step, where the driver seeds `q`/`fxyz` directly
    /// before any particle has been pushed.
    pub fn solve_field_only(&mut self) -> f64 {
        self.q.clear();
        deposit(&self.layout, &self.ppart, &self.kpic, self.qm, &mut self.q);
        accumulate_guard_scalar(&mut self.q);
        let qhat = fft_scalar_forward(&self.q, &self.tables);
        let (fhat, we) = solve(&qhat, &self.ffc);
        fft_vector_inverse(&fhat, &self.tables, &mut self.fxyz);
        replicate_guard_vector(&mut self.fxyz);
        we
    }

    /// Read-only access to the charge density field (mostly for tests
    /// and diagnostics; the driver owns I/O).
    #[must_use]
    pub fn charge(&self) -> &Field3 {
        &self.q
    }

    /// Read-only access to the force field.
    #[must_use]
    pub fn force(&self) -> &Field4 {
        &self.fxyz
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particles::attr;
    use crate::push::BoundaryPolicy;

    fn small_sim() -> Simulation {
        let grid = GridSpec::new(8, 8, 8).unwrap();
        let layout = TileLayout::new(8, 8, 8, 4, 4, 4).unwrap();
        let push_params = PushParams { qbm: 0.0, dt: 1.0, boundary: BoundaryPolicy::Periodic };
        let poisson_params = PoissonParams { ax: 0.0, ay: 0.0, az: 0.0, affp: 1.0 };
        Simulation::new(grid, layout, 16, 16, 8, 1.0, push_params, poisson_params, 4)
    }

    #[test]
    fn step_conserves_particle_count_with_zero_field() {
        let mut sim = small_sim();
        sim.ppart_mut()[0].set(attr::X, 0, 1.5);
        sim.ppart_mut()[0].set(attr::Y, 0, 1.5);
        sim.ppart_mut()[0].set(attr::Z, 0, 1.5);
        sim.ppart_mut()[0].set(attr::VX, 0, 0.5);
        sim.kpic_mut()[0] = 1;

        let before = sim.total_particles();
        for _ in 0..5 {
            let (_energies, irc) = sim.step();
            assert_eq!(irc, 0);
        }
        assert_eq!(sim.total_particles(), before);
    }

    #[test]
    fn step_with_no_particles_leaves_fields_quiescent() {
        let mut sim = small_sim();
        let (energies, irc) = sim.step();
        assert_eq!(irc, 0);
        assert_eq!(energies.ek, 0.0);
        assert_eq!(energies.we, 0.0);
    }
}
