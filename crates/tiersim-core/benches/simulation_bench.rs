use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tiersim_core::config::SimConfig;

fn two_tier_config(pool_size: u16) -> SimConfig {
    SimConfig::from_str(&format!(
        r#"
[simulation]
name = "bench"
seed = 42
horizon_ms = 1000.0

[[tier]]
name = "backend"
pool_size = {pool_size}
reply_len = {{ dist = "uniform", low = 100, high = 1000 }}

[[tier.stage]]
local_work = {{ dist = "uniform", low = 1, high = 3 }}

[[tier]]
name = "frontend"
pool_size = {pool_size}
reply_len = {{ dist = "uniform", low = 500, high = 5000 }}

[[tier.stage]]
local_work = {{ dist = "uniform", low = 1, high = 5 }}

[[tier.stage.remote_calls]]
endpoint = "backend"

[[source]]
name = "gen"
lambda = 1.0
endpoint = "frontend"
"#
    ))
    .unwrap()
}

fn bench_two_tier_1s(c: &mut Criterion) {
    let config = two_tier_config(8);
    c.bench_function("two_tier_1s_horizon_8_workers", |b| {
        b.iter(|| tiersim_core::run_scenario(black_box(&config)).unwrap())
    });
}

fn bench_two_tier_wide(c: &mut Criterion) {
    let config = two_tier_config(64);
    c.bench_function("two_tier_1s_horizon_64_workers", |b| {
        b.iter(|| tiersim_core::run_scenario(black_box(&config)).unwrap())
    });
}

criterion_group!(benches, bench_two_tier_1s, bench_two_tier_wide);
criterion_main!(benches);
