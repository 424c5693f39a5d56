use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use agendum_jobs::{Agenda, AgendaConfig, InMemoryJobStore, JobOptions, RepeatOptions};
use serde_json::json;
use std::sync::Arc;

fn setup() -> Arc<Agenda> {
    Agenda::new(Arc::new(InMemoryJobStore::new()), AgendaConfig::default())
}

fn bench_partial_save(c: &mut Criterion) {
    let mut group = c.benchmark_group("partial_save");
    group.throughput(Throughput::Elements(1));

    for dirty in [1usize, 4, 16].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(dirty), dirty, |b, &dirty| {
            let agenda = setup();
            let mut job = agenda.job(JobOptions::named("bench").with_data(json!({"n": 0})));
            job.save().unwrap();

            b.iter(|| {
                for i in 0..dirty {
                    job.attrs_mut()
                        .set(&format!("field{i}"), json!(i))
                        .unwrap();
                }
                job.save().unwrap();
                black_box(job.changed_props().len());
            });
        });
    }

    group.finish();
}

fn bench_clean_save(c: &mut Criterion) {
    let agenda = setup();
    let mut job = agenda.job(JobOptions::named("bench"));
    job.save().unwrap();

    c.bench_function("clean_save", |b| {
        b.iter(|| job.save().unwrap());
    });
}

fn bench_compute_next_run_at(c: &mut Criterion) {
    let mut group = c.benchmark_group("compute_next_run_at");
    let agenda = setup();

    for (label, interval) in [("human", "3 hours and 20 minutes"), ("cron", "*/15 9-17 * * 1-5")] {
        let mut job = agenda.job(JobOptions::named(label));
        job.repeat_every(interval, RepeatOptions::default().in_timezone("Europe/Berlin"));
        group.bench_function(label, |b| {
            b.iter(|| {
                job.compute_next_run_at();
                black_box(job.attrs().next_run_at);
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_partial_save, bench_clean_save, bench_compute_next_run_at);
criterion_main!(benches);
