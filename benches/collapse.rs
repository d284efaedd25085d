use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use hotfold::collapse::perf::{Folder, Options};
use hotfold::collapse::Collapse;

// Builds a synthetic perf-script profile: `nstacks` samples cycling through a
// few processes and call paths deep enough to exercise the frame loop.
fn synthetic_profile(nstacks: usize) -> String {
    let paths: &[&[&str]] = &[
        &["main", "run", "parse_input", "memcpy"],
        &["main", "run", "render", "draw_glyph"],
        &["main", "run", "render"],
        &["main", "idle"],
        &["start_thread", "worker_loop", "compress_block"],
    ];
    let mut out = String::with_capacity(nstacks * 200);
    for i in 0..nstacks {
        let comm = if i % 3 == 0 { "app" } else { "worker" };
        let pid = 1000 + (i % 7);
        out.push_str(&format!("{} {} {}.{:06}: 1 cycles:\n", comm, pid, i, i));
        let path = paths[i % paths.len()];
        for (depth, func) in path.iter().rev().enumerate() {
            out.push_str(&format!("\t{:x} {} (/usr/bin/app)\n", 0x400000 + depth * 64, func));
        }
        out.push('\n');
    }
    out
}

fn bench_collapse(c: &mut Criterion) {
    let input = synthetic_profile(10_000);

    let mut group = c.benchmark_group("collapse-perf");
    group.throughput(Throughput::Bytes(input.len() as u64));

    for nthreads in [1, *hotfold::collapse::DEFAULT_NTHREADS] {
        group.bench_with_input(
            BenchmarkId::from_parameter(nthreads),
            &input,
            |b, input| {
                b.iter(|| {
                    let mut folder = Folder::from(Options {
                        nthreads,
                        ..Options::default()
                    });
                    folder
                        .collapse(input.as_bytes(), std::io::sink())
                        .unwrap();
                })
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_collapse);
criterion_main!(benches);
