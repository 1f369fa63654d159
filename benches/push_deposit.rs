/// Profiler friendly version of push+deposit.

use criterion::{criterion_group, criterion_main, Criterion};
use rand::{rngs::StdRng, Rng, SeedableRng};

use pic3d::grid::{Field4, GridSpec};
use pic3d::particles::{attr, Ihole, Ncl, ParticleTile};
use pic3d::push::{push_with_flag, BoundaryPolicy, PushParams};
use pic3d::deposit::deposit;
use pic3d::TileLayout;

const NX: usize = 64;
const NPPMX: usize = 64;
const NTMAX: usize = 32;

fn seeded_state() -> (TileLayout, Vec<ParticleTile>, Vec<usize>, Field4) {
    let layout = TileLayout::new(NX, NX, NX, 8, 8, 8).unwrap();
    let grid = GridSpec::new(NX, NX, NX).unwrap();
    let fxyz = Field4::zeros(grid);
    let mut ppart = vec![ParticleTile::new(NPPMX); layout.num_tiles()];
    let mut kpic = vec![0usize; layout.num_tiles()];
    let mut rng = StdRng::seed_from_u64(0x2545_F491_4F6C_DD1D);
    for l in 0..layout.num_tiles() {
        let c = layout.decode(l);
        let (noff, moff, loff) = (c.ix as f64 * 8.0, c.iy as f64 * 8.0, c.iz as f64 * 8.0);
        for n in 0..NPPMX {
            ppart[l].set(attr::X, n, noff + rng.gen::<f64>() * 8.0);
            ppart[l].set(attr::Y, n, moff + rng.gen::<f64>() * 8.0);
            ppart[l].set(attr::Z, n, loff + rng.gen::<f64>() * 8.0);
            ppart[l].set(attr::VX, n, rng.gen::<f64>() - 0.5);
            ppart[l].set(attr::VY, n, rng.gen::<f64>() - 0.5);
            ppart[l].set(attr::VZ, n, rng.gen::<f64>() - 0.5);
        }
        kpic[l] = NPPMX;
    }
    (layout, ppart, kpic, fxyz)
}

fn my_benchmark(c: &mut Criterion) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".into()))
        .try_init();
    let (layout, ppart, kpic, fxyz) = seeded_state();
    let params = PushParams { qbm: 1.0, dt: 0.01, boundary: BoundaryPolicy::Periodic };
    let mut ncl = vec![Ncl::new(); layout.num_tiles()];
    let mut ihole = vec![Ihole::new(); layout.num_tiles()];

    c.bench_function("push_with_flag_64cubed", |b| {
        b.iter(|| {
            let mut ppart = ppart.clone();
            push_with_flag(&layout, &mut ppart, &kpic, &fxyz, params, &mut ncl, &mut ihole, NTMAX)
        })
    });

    let spec = GridSpec::new(NX, NX, NX).unwrap();
    c.bench_function("deposit_64cubed", |b| {
        b.iter(|| {
            let mut q = pic3d::Field3::zeros(spec);
            deposit(&layout, &ppart, &kpic, 1.0, &mut q);
        })
    });
}

criterion_group! {
    name = benches;
    config = Criterion::default().sample_size(10);
    targets = my_benchmark
}
criterion_main!(benches);
