use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use dispatcher::config::DispatchConfig;
use dispatcher::dispatch::{send, DispatchContext, SendRequest};
use dispatcher::filter::{FilterFlow, FilterFn, FilterRegistry, GLOBAL_CATEGORY};
use dispatcher::rate_limit::{
    FixedWindowConfig, FixedWindowLimiter, MemoryQuotaStore, QuotaLimiter, TokenBucketConfig,
    TokenBucketLimiter,
};
use dispatcher::selector::RandomSelector;
use dispatcher::sender::LogSender;
use std::sync::Arc;
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to build runtime")
}

fn benchmark_filter_chain(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("filter_chain");

    for num_filters in [1, 5, 20].iter() {
        let ctx = rt.block_on(async {
            let filters = Arc::new(FilterRegistry::new());
            for i in 0..*num_filters {
                let category = if i % 2 == 0 { GLOBAL_CATEGORY } else { "bench" };
                filters
                    .register(
                        category,
                        Arc::new(FilterFn::new(format!("noop-{}", i), |_, _, _| {
                            FilterFlow::Continue
                        })),
                    )
                    .await;
            }
            let selector = Arc::new(RandomSelector::new());
            selector.add_sender("bench", Arc::new(LogSender)).await;
            DispatchContext::new()
                .with_filters(filters)
                .with_selector(selector)
        });

        group.bench_with_input(
            BenchmarkId::from_parameter(num_filters),
            num_filters,
            |b, &_num| {
                b.to_async(&rt).iter(|| async {
                    let req = SendRequest::new("bench", vec!["r1".to_string(), "r2".to_string()]);
                    black_box(send(&ctx, req).await)
                })
            },
        );
    }
    group.finish();
}

fn benchmark_limiters(c: &mut Criterion) {
    let rt = runtime();
    let ctx = DispatchContext::new();
    let store = Arc::new(MemoryQuotaStore::new());

    let token_bucket: Arc<dyn QuotaLimiter> = Arc::new(TokenBucketLimiter::new(
        store.clone(),
        TokenBucketConfig::new(u64::MAX / 2, 1, 1),
    ));
    let fixed_window: Arc<dyn QuotaLimiter> = Arc::new(FixedWindowLimiter::new(
        store,
        FixedWindowConfig::new(u64::MAX / 2, 3600),
    ));

    c.bench_function("token_bucket_acquire", |b| {
        b.to_async(&rt)
            .iter(|| async { black_box(token_bucket.acquire(&ctx, "bench").await) })
    });

    c.bench_function("fixed_window_acquire", |b| {
        b.to_async(&rt)
            .iter(|| async { black_box(fixed_window.acquire(&ctx, "bench").await) })
    });
}

fn benchmark_config_parsing(c: &mut Criterion) {
    let yaml = r#"
store:
  redis_url: "redis://127.0.0.1:6379"
filters:
  - category: "*"
    rate_limits:
      - strategy: token_bucket
        max_tokens: 5
        refill_rate: 3
        period_secs: 10
"#;

    c.bench_function("config_parsing", |b| {
        b.iter(|| black_box(DispatchConfig::from_yaml(yaml)))
    });
}

criterion_group!(
    benches,
    benchmark_filter_chain,
    benchmark_limiters,
    benchmark_config_parsing,
);

criterion_main!(benches);
