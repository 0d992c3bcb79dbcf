/// blaststats - Statistics for constant region summary files
///
/// Tallies queries, hits, no-hit queries, reversed hits and per-call counts
/// from a `.blastsummary.txt` written by `vdjprep assign-isotype`.
use anyhow::{Context, Result};
use clap::Parser;
use std::collections::HashMap;
use vdjprep::hit::strip_allele;
use vdjprep::summary::SummaryIndex;

#[derive(Parser)]
#[clap(
    name = "blaststats",
    about = "Statistics for constant region summary files"
)]
struct Args {
    /// First summary file
    file1: String,

    /// Optional second file for comparison
    file2: Option<String>,

    /// Show per-call counts
    #[clap(short = 'd', long)]
    detailed: bool,

    /// Count calls with their allele (IGHG1*01 instead of IGHG1)
    #[clap(short = 'a', long)]
    allele: bool,
}

#[derive(Debug, Default)]
struct SummaryStats {
    queries: usize,
    hits: usize,
    no_hits: usize,
    reversed: usize,
    identity_sum: f64,
    calls: HashMap<String, usize>,
}

impl SummaryStats {
    fn from_index(index: &SummaryIndex, allele: bool) -> Self {
        let mut stats = SummaryStats {
            queries: index.len(),
            no_hits: index.no_hit_count(),
            ..Default::default()
        };
        for hit in index.hits() {
            stats.hits += 1;
            if hit.reversed {
                stats.reversed += 1;
            }
            stats.identity_sum += hit.percent_identity;
            let call = if allele {
                hit.subject_id.as_str()
            } else {
                strip_allele(&hit.subject_id)
            };
            *stats.calls.entry(call.to_string()).or_insert(0) += 1;
        }
        stats
    }

    fn avg_identity(&self) -> f64 {
        if self.hits > 0 {
            self.identity_sum / self.hits as f64
        } else {
            0.0
        }
    }

    fn hit_rate(&self) -> f64 {
        if self.queries > 0 {
            100.0 * self.hits as f64 / self.queries as f64
        } else {
            0.0
        }
    }
}

fn load(path: &str, allele: bool) -> Result<SummaryStats> {
    let index = SummaryIndex::read(path).context(format!("Failed to read {path}"))?;
    Ok(SummaryStats::from_index(&index, allele))
}

fn print_stats(path: &str, stats: &SummaryStats, detailed: bool) {
    println!("\nStatistics for {path}:");
    println!("{}", "=".repeat(60));
    println!("Queries:               {:>12}", format_number(stats.queries));
    println!("With C segment:        {:>12}", format_number(stats.hits));
    println!("No C segment:          {:>12}", format_number(stats.no_hits));
    println!("Reversed hits:         {:>12}", format_number(stats.reversed));
    println!("Assigned:              {:>11.1}%", stats.hit_rate());
    println!("Average identity:      {:>11.1}%", stats.avg_identity());
    println!("Distinct calls:        {:>12}", stats.calls.len());

    if detailed && !stats.calls.is_empty() {
        println!("\nPer-call counts:");
        println!("{}", "-".repeat(60));
        let mut calls: Vec<_> = stats.calls.iter().collect();
        calls.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        for (call, count) in calls {
            let pct = 100.0 * *count as f64 / stats.hits as f64;
            println!("{:20} {:>12} {:6.1}%", call, format_number(*count), pct);
        }
    }
}

fn compare_stats(file1: &str, file2: &str, stats1: &SummaryStats, stats2: &SummaryStats) {
    println!("\nComparison: {file1} vs {file2}");
    println!("{}", "=".repeat(60));

    print_comparison("Queries", stats1.queries, stats2.queries);
    print_comparison("With C segment", stats1.hits, stats2.hits);
    print_comparison("Reversed hits", stats1.reversed, stats2.reversed);

    println!("\nAverage identity:");
    println!("  {:30} {:>11.1}%", file1, stats1.avg_identity());
    println!("  {:30} {:>11.1}%", file2, stats2.avg_identity());
    println!(
        "  {:30} {:>+10.1}%",
        "Change",
        stats2.avg_identity() - stats1.avg_identity()
    );
}

fn print_comparison(label: &str, val1: usize, val2: usize) {
    println!("\n{label}:");
    println!("  {:30} {:>12}", "Before", format_number(val1));
    println!("  {:30} {:>12}", "After", format_number(val2));

    let diff = val2 as i64 - val1 as i64;
    let pct = if val1 > 0 {
        100.0 * diff as f64 / val1 as f64
    } else {
        0.0
    };
    println!(
        "  {:30} {:>12} ({:+.1}%)",
        "Change",
        format_signed(diff),
        pct
    );
}

fn format_number(n: usize) -> String {
    let s = n.to_string();
    let mut result = String::new();
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

fn format_signed(n: i64) -> String {
    if n >= 0 {
        format!("+{}", format_number(n as usize))
    } else {
        format!("-{}", format_number((-n) as usize))
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let stats1 = load(&args.file1, args.allele)?;

    if let Some(file2) = args.file2 {
        let stats2 = load(&file2, args.allele)?;
        compare_stats(&args.file1, &file2, &stats1, &stats2);
    } else {
        print_stats(&args.file1, &stats1, args.detailed);
    }

    Ok(())
}
