/// Profiler friendly version of the FFT + Poisson field solve.

use criterion::{criterion_group, criterion_main, Criterion};
use rand::{rngs::StdRng, Rng, SeedableRng};

use pic3d::fft::{fft_scalar_forward, fft_vector_inverse, FftTables};
use pic3d::grid::{Field3, Field4, GridSpec};
use pic3d::poisson::{init_form_factor, solve, PoissonParams};

const NX: usize = 64;

fn seeded_charge(spec: GridSpec) -> Field3 {
    let mut q = Field3::zeros(spec);
    let mut rng = StdRng::seed_from_u64(0xA341_316C_6D67_1A1E);
    for ix in 0..spec.nx {
        for iy in 0..spec.ny {
            for iz in 0..spec.nz {
                *q.get_mut(ix, iy, iz) = rng.gen::<f64>() - 0.5;
            }
        }
    }
    q
}

fn my_benchmark(c: &mut Criterion) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".into()))
        .try_init();
    let spec = GridSpec::new(NX, NX, NX).unwrap();
    let tables = FftTables::new(NX, NX, NX).unwrap();
    let params = PoissonParams { ax: 1.0, ay: 1.0, az: 1.0, affp: 1.0 };
    let ffc = init_form_factor(NX, NX, NX, params);
    let q = seeded_charge(spec);

    c.bench_function("field_solve_64cubed", |b| {
        b.iter(|| {
            let qhat = fft_scalar_forward(&q, &tables);
            let (fhat, _we) = solve(&qhat, &ffc);
            let mut fxyz = Field4::zeros(spec);
            fft_vector_inverse(&fhat, &tables, &mut fxyz);
        })
    });
}

criterion_group! {
    name = benches;
    config = Criterion::default().sample_size(10);
    targets = my_benchmark
}
criterion_main!(benches);
