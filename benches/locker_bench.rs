// Copyright 2025 dentsusoken
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use locksmith::locking::{Locker, MultiLocker, NotificationHooks, Tracer};
use std::sync::Arc;
use std::time::Duration;

fn bench_uncontended_policies(c: &mut Criterion) {
    let mut group = c.benchmark_group("uncontended_policies");
    let locker = Locker::new("bench").with_hooks(Arc::new(NotificationHooks::new()));

    group.bench_function("lazy", |b| b.iter(|| locker.lazy(|| black_box(1))));

    group.bench_function("patient", |b| b.iter(|| locker.patient(|| black_box(1))));

    group.bench_function("hard", |b| {
        b.iter(|| locker.hard_with_timeout(Duration::from_millis(10), || black_box(1)))
    });

    group.bench_function("reentrant_hard", |b| {
        locker
            .hard(|| b.iter(|| locker.hard(|| black_box(1))))
            .unwrap();
    });

    group.finish();
}

fn bench_frame_capture(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_capture");

    for capture in [false, true] {
        let tracer = Arc::new(Tracer::new());
        tracer.set_capture_frames(capture);
        let locker = Locker::new("bench-tracer")
            .with_tracer(tracer)
            .with_hooks(Arc::new(NotificationHooks::new()));

        group.bench_with_input(BenchmarkId::from_parameter(capture), &locker, |b, locker| {
            b.iter(|| locker.patient(|| black_box(1)))
        });
    }

    group.finish();
}

fn bench_multi_locker(c: &mut Criterion) {
    let mut group = c.benchmark_group("multi_locker");
    group.sample_size(20);

    let lockers: Vec<Locker> = (0..4)
        .map(|idx| {
            Locker::new(format!("bench-{idx}")).with_hooks(Arc::new(NotificationHooks::new()))
        })
        .collect();

    for size in [1_usize, 2, 4] {
        let members: Vec<&Locker> = lockers.iter().take(size).collect();
        let multi = MultiLocker::new(&members);
        group.bench_with_input(BenchmarkId::from_parameter(size), &multi, |b, multi| {
            b.iter(|| multi.hard(|| black_box(1)).unwrap())
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_uncontended_policies,
    bench_frame_capture,
    bench_multi_locker
);
criterion_main!(benches);
