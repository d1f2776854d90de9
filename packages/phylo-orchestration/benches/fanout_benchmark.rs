//! Benchmarks for the in-process per-locus work
//!
//! Measures:
//! - Header tagging of one taxon's locus file
//! - Gathering a locus directory tree into per-locus files
//! - Outlier distance matrix as the taxon count grows

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use phylo_orchestration::fanout;
use phylo_orchestration::outliers;
use phylo_orchestration::stages::gather::assemble_locus;
use phylo_orchestration::HeaderPolicy;
use tempfile::TempDir;

/// BUSCO-style locus file with a wrapped 60-column body
fn generate_locus_file(locus: &str, residues: usize) -> String {
    let mut content = format!(">{}:12345-{}\n", locus, 12345 + residues * 3);
    let body = "MKVLAAGIVGLLLAQPAFA".repeat(residues / 19 + 1);
    for chunk in body.as_bytes()[..residues].chunks(60) {
        content.push_str(std::str::from_utf8(chunk).unwrap());
        content.push('\n');
    }
    content
}

fn bench_header_tagging(c: &mut Criterion) {
    let mut group = c.benchmark_group("header_tagging");

    for residues in [300, 3000, 30000].iter() {
        let text = generate_locus_file("EOG0900001", *residues);
        group.bench_with_input(BenchmarkId::from_parameter(residues), &text, |b, text| {
            let policy = HeaderPolicy::Tag {
                taxon: "Drosophila_melanogaster",
                locus: "EOG0900001",
            };
            b.iter(|| black_box(policy.apply(black_box(text))));
        });
    }

    group.finish();
}

fn bench_gather(c: &mut Criterion) {
    let mut group = c.benchmark_group("gather");
    group.sample_size(20);

    for num_taxa in [10, 50].iter() {
        // Setup: num_taxa x 100 loci on disk
        let dir = TempDir::new().unwrap();
        for t in 0..*num_taxa {
            let locus_dir = dir
                .path()
                .join(format!("taxon_{:03}", t))
                .join("run_bench/busco_sequences/single_copy_busco_sequences");
            std::fs::create_dir_all(&locus_dir).unwrap();
            for l in 0..100 {
                let locus = format!("EOG{:04}", l);
                std::fs::write(
                    locus_dir.join(format!("{}.faa", locus)),
                    generate_locus_file(&locus, 400),
                )
                .unwrap();
            }
        }

        group.bench_with_input(
            BenchmarkId::from_parameter(num_taxa),
            num_taxa,
            |b, _| {
                b.iter(|| {
                    let sources = fanout::enumerate_sources(
                        dir.path(),
                        "run_*/busco_sequences/single_copy_busco_sequences",
                    )
                    .unwrap();
                    let groups: Vec<_> = fanout::group_by_locus(sources).into_iter().collect();
                    let assembled = fanout::par_map(4, &groups, |(locus, sources)| {
                        assemble_locus(locus, sources).map(|s| s.len())
                    })
                    .unwrap();
                    black_box(assembled);
                });
            },
        );
    }

    group.finish();
}

fn bench_mean_distances(c: &mut Criterion) {
    let mut group = c.benchmark_group("mean_distances");

    for num_taxa in [10, 50, 200].iter() {
        let seqs: Vec<Vec<u8>> = (0..*num_taxa)
            .map(|i| {
                let mut s = b"MKVLAAGIVG-LLLAQPAFA".repeat(25);
                s[i % 500] = b'W';
                s
            })
            .collect();

        group.bench_with_input(BenchmarkId::from_parameter(num_taxa), &seqs, |b, seqs| {
            b.iter(|| {
                let means = outliers::mean_distances(black_box(seqs));
                black_box(outliers::z_scores(&means))
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_header_tagging,
    bench_gather,
    bench_mean_distances
);
criterion_main!(benches);
