//! Benchmarks for chatlens parsing and import.
//!
//! Run with: `cargo bench`
//! Run specific group: `cargo bench --bench parsing -- line`

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::io::Write;

use chatlens::cancel::CancelToken;
use chatlens::config::ParseOptions;
use chatlens::import::run_import;
use chatlens::message::ParseEvent;
use chatlens::parsers::Format;
use chatlens::progress::no_progress;
use chatlens::store::Store;

// =============================================================================
// Test Data Generators
// =============================================================================

fn generate_line_txt(count: usize) -> String {
    let mut out = String::from("[LINE] Chat history in Bench\nSaved on: 2025/01/02 10:00\n\n");
    for day in 0..=(count / 1000) {
        out.push_str(&format!("2025/01/{:02} Friday\n", (day % 27) + 1));
        for i in 0..1000.min(count - day * 1000) {
            let sender = if i % 2 == 0 { "Alice" } else { "Bob" };
            out.push_str(&format!(
                "{:02}:{:02}\t{}\tmessage number {}\n",
                (i / 60) % 24,
                i % 60,
                sender,
                i
            ));
        }
    }
    out
}

fn generate_native_jsonl(count: usize) -> String {
    let mut out = String::from(
        "{\"chatlens_version\": 1, \"name\": \"Bench\", \"platform\": \"line\", \"chat_kind\": \"group\", \"members\": []}\n",
    );
    for i in 0..count {
        let sender = if i % 2 == 0 { "alice" } else { "bob" };
        out.push_str(&format!(
            "{{\"sender_id\": \"{}\", \"ts\": {}, \"kind\": \"text\", \"content\": \"message number {}\"}}\n",
            sender,
            1735812900 + i as i64 * 60,
            i
        ));
    }
    out
}

fn write_fixture(dir: &tempfile::TempDir, name: &str, body: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(body.as_bytes()).unwrap();
    path
}

// =============================================================================
// Benchmarks
// =============================================================================

fn bench_parse(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let mut group = c.benchmark_group("parse");

    for &count in &[1_000usize, 10_000] {
        let line_path = write_fixture(
            &dir,
            &format!("line_{count}.txt"),
            &generate_line_txt(count),
        );
        let jsonl_path = write_fixture(
            &dir,
            &format!("native_{count}.jsonl"),
            &generate_native_jsonl(count),
        );
        let options = ParseOptions::new();

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("line", count), &line_path, |b, path| {
            b.iter(|| {
                let mut messages = 0u64;
                for event in Format::LineTxt.events(path, &options).unwrap() {
                    if let ParseEvent::Messages(batch) = event.unwrap() {
                        messages += batch.len() as u64;
                    }
                }
                messages
            })
        });
        group.bench_with_input(
            BenchmarkId::new("native-jsonl", count),
            &jsonl_path,
            |b, path| {
                b.iter(|| {
                    let mut messages = 0u64;
                    for event in Format::NativeJsonl.events(path, &options).unwrap() {
                        if let ParseEvent::Messages(batch) = event.unwrap() {
                            messages += batch.len() as u64;
                        }
                    }
                    messages
                })
            },
        );
    }
    group.finish();
}

fn bench_import(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let count = 5_000usize;
    let path = write_fixture(&dir, "import.jsonl", &generate_native_jsonl(count));
    let options = ParseOptions::new();

    let mut group = c.benchmark_group("import");
    group.throughput(Throughput::Elements(count as u64));
    group.bench_function("native-jsonl", |b| {
        b.iter(|| {
            let store = Store::open_in_memory().unwrap();
            run_import(&store, &path, &options, &no_progress(), &CancelToken::new()).unwrap()
        })
    });
    group.finish();
}

criterion_group!(benches, bench_parse, bench_import);
criterion_main!(benches);
