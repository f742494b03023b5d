//! Benchmarks for progress bus publishing and replay.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use incidentflow::core::{EventKind, JobId};
use incidentflow::events::{BusConfig, NoOpEventSink, ProgressBus};
use std::sync::Arc;

fn quiet_bus() -> ProgressBus {
    ProgressBus::with_sink(BusConfig::new().with_backlog(1 << 16), Arc::new(NoOpEventSink))
}

fn publish_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("publish_fan_out");
    for observers in [0usize, 1, 8, 64] {
        group.bench_with_input(BenchmarkId::from_parameter(observers), &observers, |b, &n| {
            b.iter_batched(
                || {
                    let bus = quiet_bus();
                    let job_id = JobId::new();
                    let _ = bus.open(job_id);
                    let handles: Vec<_> = (0..n).filter_map(|_| bus.attach(job_id).ok()).collect();
                    (bus, job_id, handles)
                },
                |(bus, job_id, handles)| {
                    for i in 0..100 {
                        let _ = black_box(bus.publish(
                            job_id,
                            EventKind::Status,
                            serde_json::json!({ "i": i }),
                        ));
                    }
                    handles
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn attach_replay(c: &mut Criterion) {
    let bus = quiet_bus();
    let job_id = JobId::new();
    let _ = bus.open(job_id);
    for i in 0..500 {
        let _ = bus.publish(job_id, EventKind::Status, serde_json::json!({ "i": i }));
    }
    let _ = bus.close(job_id);

    c.bench_function("attach_replay_500", |b| {
        b.iter(|| black_box(bus.attach(job_id)))
    });
}

criterion_group!(benches, publish_fan_out, attach_replay);
criterion_main!(benches);
