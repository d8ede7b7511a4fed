use criterion::{criterion_group, criterion_main, Criterion};
use maverick::abstraction::preflop_bin;
use maverick::card_utils::Card;
use maverick::config::{Config, StoreBackend};
use maverick::game::{InfoKey, Street};
use maverick::sampler::{Buckets, Sampler};
use maverick::store::Store;
use rand::rngs::StdRng;
use rand::SeedableRng;
use smallvec::smallvec;

struct PreflopOnly;

impl Buckets for PreflopOnly {
    fn bucket_id(&self, hole: &[Card], _board: &[Card], _street: Street) -> u32 {
        preflop_bin(hole)
    }
}

fn bench_sampler(c: &mut Criterion) {
    let mut config = Config::default();
    config.training.prune.enabled = false;
    config.training.bet_abstraction = vec![vec![0.5, 1.0, -1.0]; 4];

    let sampler = Sampler::new(&config.game, &config.training, &PreflopOnly);
    let mut store = Store::new(StoreBackend::Dense, config.training.regret_floor);
    let mut rng = StdRng::seed_from_u64(1);
    let mut t = 0u64;
    c.bench_function("mccfr_iteration_heads_up", |b| {
        b.iter(|| {
            t += 1;
            sampler.run_iteration(&mut store, t, &mut rng);
        })
    });
}

fn bench_store(c: &mut Criterion) {
    let mut store = Store::new(StoreBackend::Dense, -3.1e8);
    let keys: Vec<InfoKey> = (0..1000)
        .map(|b| InfoKey {
            street: (b % 4) as u8,
            bucket: b,
            path: smallvec![1, 2, (b % 7) as u8],
        })
        .collect();
    for (i, key) in keys.iter().enumerate() {
        store.update_regret(key, i % 4, 4, (i as f64).sin() * 100.0, 1.0);
    }

    let mut i = 0usize;
    c.bench_function("store_update_and_match", |b| {
        b.iter(|| {
            i = (i + 1) % keys.len();
            store.update_regret(&keys[i], i % 4, 4, 12.5, (i + 1) as f64);
            criterion::black_box(store.get_strategy(&keys[i], 4));
        })
    });

    c.bench_function("store_lazy_discount", |b| {
        b.iter(|| store.discount(0.999, 0.999))
    });
}

criterion_group!(benches, bench_sampler, bench_store);
criterion_main!(benches);
