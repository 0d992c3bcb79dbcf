/// Performance benchmarks for report parsing and contig resolution
///
/// Run with: cargo bench
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use vdjprep::blast_xml::{parse_chunk, split_lines};
use vdjprep::resolve::resolve_batch;
use vdjprep::summary::SummaryIndex;

/// Generate a synthetic `-outfmt 5` report, every third query without a hit
fn generate_report(num_queries: usize) -> Vec<String> {
    let mut lines = vec![
        "<?xml version=\"1.0\"?>".to_string(),
        "<BlastOutput>".to_string(),
        "  <BlastOutput_program>blastn</BlastOutput_program>".to_string(),
        "  <BlastOutput_iterations>".to_string(),
    ];

    for i in 0..num_queries {
        lines.push("    <Iteration>".to_string());
        lines.push(format!("      <Iteration_iter-num>{}</Iteration_iter-num>", i + 1));
        lines.push(format!(
            "      <Iteration_query-def>cell{i}-1_contig_1</Iteration_query-def>"
        ));
        lines.push("      <Iteration_query-len>550</Iteration_query-len>".to_string());
        if i % 3 == 2 {
            lines.push("      <Iteration_message>No hits found</Iteration_message>".to_string());
        } else {
            let (hit_from, hit_to) = if i % 2 == 0 { (1, 81) } else { (81, 1) };
            for line in [
                "      <Iteration_hits>".to_string(),
                "        <Hit>".to_string(),
                format!("          <Hit_def>IGHG{}*01_CH1</Hit_def>", i % 4 + 1),
                format!("          <Hit_accession>IGHG{}*01_CH1</Hit_accession>", i % 4 + 1),
                "              <Hsp_bit-score>147.2</Hsp_bit-score>".to_string(),
                "              <Hsp_evalue>1.3e-35</Hsp_evalue>".to_string(),
                "              <Hsp_query-from>400</Hsp_query-from>".to_string(),
                "              <Hsp_query-to>480</Hsp_query-to>".to_string(),
                format!("              <Hsp_hit-from>{hit_from}</Hsp_hit-from>"),
                format!("              <Hsp_hit-to>{hit_to}</Hsp_hit-to>"),
                "              <Hsp_identity>80</Hsp_identity>".to_string(),
                "              <Hsp_gaps>0</Hsp_gaps>".to_string(),
                "              <Hsp_align-len>81</Hsp_align-len>".to_string(),
                format!("              <Hsp_qseq>{}</Hsp_qseq>", "ACGT".repeat(20)),
                "        </Hit>".to_string(),
                "      </Iteration_hits>".to_string(),
            ] {
                lines.push(line);
            }
        }
        lines.push("    </Iteration>".to_string());
    }

    lines.push("  </BlastOutput_iterations>".to_string());
    lines.push("</BlastOutput>".to_string());
    lines
}

/// Benchmark: splitting a report into per-query chunks
fn bench_split_lines(c: &mut Criterion) {
    let mut group = c.benchmark_group("split_lines");

    for size in [100, 1000, 10000].iter() {
        let lines = generate_report(*size);
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &lines, |b, lines| {
            b.iter(|| split_lines(black_box(lines)));
        });
    }

    group.finish();
}

/// Benchmark: parsing every chunk of a report
fn bench_parse_chunks(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_chunks");

    for size in [100, 1000, 10000].iter() {
        let chunks = split_lines(generate_report(*size));
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &chunks, |b, chunks| {
            b.iter(|| {
                chunks
                    .iter()
                    .filter_map(|chunk| parse_chunk(black_box(chunk)).unwrap())
                    .count()
            });
        });
    }

    group.finish();
}

/// Benchmark: sequential vs parallel resolution of contigs
fn bench_resolve_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve_batch");
    let size = 10000;
    let outcomes: Vec<_> = split_lines(generate_report(size))
        .iter()
        .filter_map(|chunk| parse_chunk(chunk).unwrap())
        .collect();
    let index = SummaryIndex::from_outcomes(outcomes);
    let contigs: Vec<String> = (0..size).map(|i| format!("cell{i}-1_contig_1")).collect();
    group.throughput(Throughput::Elements(size as u64));

    for parallel in [false, true] {
        let label = if parallel { "parallel" } else { "sequential" };
        group.bench_function(label, |b| {
            b.iter(|| resolve_batch(black_box(&index), black_box(&contigs), false, parallel).len());
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_split_lines,
    bench_parse_chunks,
    bench_resolve_batch
);

criterion_main!(benches);
