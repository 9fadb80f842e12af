use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::io::{Cursor, Write};
use testcase_ingest::{classify_entry_name, ArchiveScanner, IndexNormalizer, IngestLimits, PairValidator};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

/// Archive with `cases` sparse, shuffled pairs of 1KB files
fn synthetic_archive(cases: u64) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    let payload = vec![b'7'; 1024];

    writer.add_directory("input/", options).unwrap();
    writer.add_directory("output/", options).unwrap();
    for i in 0..cases {
        let number = (i * 7919) % (cases * 3) + 1;
        writer.start_file(format!("input/input{number}.txt"), options).unwrap();
        writer.write_all(&payload).unwrap();
        writer.start_file(format!("output/output{number}.out"), options).unwrap();
        writer.write_all(&payload).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

fn bench_classify(c: &mut Criterion) {
    let mut group = c.benchmark_group("classify");

    group.bench_function("testcase_name", |b| {
        b.iter(|| black_box(classify_entry_name(black_box("output/output123456.txt"))));
    });

    group.bench_function("rejected_name", |b| {
        b.iter(|| black_box(classify_entry_name(black_box("__MACOSX/input/._input1.txt"))));
    });

    group.finish();
}

fn bench_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline");

    let archive = synthetic_archive(200);
    let scanner = ArchiveScanner::new(IngestLimits::default());

    group.bench_function("scan_validate_normalize_200", |b| {
        b.iter(|| {
            let scanned = scanner.scan(Cursor::new(archive.as_slice())).unwrap();
            let validated = PairValidator::strict().validate(scanned.entries()).unwrap();
            black_box(IndexNormalizer.normalize(validated.pairs))
        });
    });

    group.finish();
}

criterion_group!(benches, bench_classify, bench_pipeline);
criterion_main!(benches);
