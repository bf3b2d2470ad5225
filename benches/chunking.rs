use criterion::{Criterion, criterion_group, criterion_main};
use docuchat::embeddings::{ChunkingConfig, TextChunker};
use std::hint::black_box;

fn sample_document() -> String {
    let sentence = "Retrieval quality depends on chunks that keep related sentences together. ";
    let paragraph = sentence.repeat(12);
    (0..200)
        .map(|i| format!("Section {}\n{}", i, paragraph))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let document = sample_document();

    let default_chunker = TextChunker::new(ChunkingConfig::default());
    c.bench_function("chunking_default", |b| {
        b.iter(|| default_chunker.chunk(black_box(&document)))
    });

    let small_chunker = TextChunker::new(ChunkingConfig {
        chunk_size: 200,
        overlap_size: 40,
    });
    c.bench_function("chunking_small_chunks", |b| {
        b.iter(|| small_chunker.chunk(black_box(&document)))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
