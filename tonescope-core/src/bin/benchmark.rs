//! Transform throughput benchmark.
//!
//! Times `SpectrumEngine::execute` + `SpectrumPostProcessor::compute` for a
//! set of frame sizes and compares the latency with the capture block cadence
//! (`frames_per_buffer / sample_rate`). A frame must be analyzed well within
//! one block period or the next frame starts dropping blocks.

fn main() {
    if let Err(e) = run() {
        eprintln!("benchmark failed: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    use serde::Serialize;
    use std::path::PathBuf;
    use std::time::Instant;
    use tonescope_core::spectrum::{SpectrumEngine, SpectrumPostProcessor, TransformPlan};

    #[derive(Debug)]
    struct Args {
        sample_rate: u32,
        frames_per_buffer: u32,
        sizes: Vec<usize>,
        iterations: usize,
        output: Option<PathBuf>,
    }

    #[derive(Debug, Clone, Serialize)]
    struct CaseSummary {
        transform_size: usize,
        runs: usize,
        p50_latency_ms: f64,
        p95_latency_ms: f64,
        avg_latency_ms: f64,
        /// p95 latency as a fraction of one capture block period.
        block_budget_ratio: f64,
    }

    #[derive(Debug, Clone, Serialize)]
    struct Summary {
        sample_rate: u32,
        frames_per_buffer: u32,
        block_period_ms: f64,
        iterations: usize,
        cases: Vec<CaseSummary>,
    }

    fn parse_args() -> Result<Args, String> {
        let mut sample_rate: u32 = 44_100;
        let mut frames_per_buffer: u32 = 1_024;
        let mut sizes: Option<Vec<usize>> = None;
        let mut iterations: usize = 20;
        let mut output: Option<PathBuf> = None;

        let mut it = std::env::args().skip(1);
        while let Some(arg) = it.next() {
            match arg.as_str() {
                "--sample-rate" => {
                    let Some(v) = it.next() else {
                        return Err("missing value for --sample-rate".into());
                    };
                    sample_rate = v
                        .parse::<u32>()
                        .ok()
                        .filter(|&r| r > 0)
                        .ok_or_else(|| "invalid value for --sample-rate".to_string())?;
                }
                "--frames-per-buffer" => {
                    let Some(v) = it.next() else {
                        return Err("missing value for --frames-per-buffer".into());
                    };
                    frames_per_buffer = v
                        .parse::<u32>()
                        .ok()
                        .filter(|&f| f > 0)
                        .ok_or_else(|| "invalid value for --frames-per-buffer".to_string())?;
                }
                "--sizes" => {
                    let Some(v) = it.next() else {
                        return Err("missing value for --sizes".into());
                    };
                    let parsed = v
                        .split(',')
                        .map(|s| s.trim().parse::<usize>())
                        .collect::<Result<Vec<_>, _>>()
                        .map_err(|_| "invalid value for --sizes".to_string())?;
                    sizes = Some(parsed);
                }
                "--iterations" => {
                    let Some(v) = it.next() else {
                        return Err("missing value for --iterations".into());
                    };
                    iterations = v
                        .parse::<usize>()
                        .map_err(|_| "invalid value for --iterations".to_string())?
                        .clamp(1, 1_000);
                }
                "--output" => {
                    let Some(v) = it.next() else {
                        return Err("missing value for --output".into());
                    };
                    output = Some(PathBuf::from(v));
                }
                "--help" | "-h" => {
                    println!(
                        "Usage: cargo run -p tonescope-core --release --bin benchmark -- \\
  [--sample-rate <hz>] [--frames-per-buffer <n>] [--sizes <n,n,...>] \\
  [--iterations <n>] [--output <file.json>]"
                    );
                    std::process::exit(0);
                }
                other => {
                    return Err(format!("unknown argument: {other}"));
                }
            }
        }

        let sizes = sizes.unwrap_or_else(|| {
            let rate = sample_rate as usize;
            vec![rate / 4, rate / 2, rate, rate * 2]
        });
        Ok(Args {
            sample_rate,
            frames_per_buffer,
            sizes,
            iterations,
            output,
        })
    }

    fn percentile(values: &[f64], p: f64) -> f64 {
        if values.is_empty() {
            return 0.0;
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        if sorted.len() == 1 {
            return sorted[0];
        }
        let idx = ((sorted.len() - 1) as f64 * p.clamp(0.0, 1.0)).round() as usize;
        sorted[idx.min(sorted.len() - 1)]
    }

    let args = parse_args()?;
    let block_period_ms =
        f64::from(args.frames_per_buffer) / f64::from(args.sample_rate) * 1_000.0;

    println!(
        "Running tonescope transform benchmark on {} sizes (iterations={})",
        args.sizes.len(),
        args.iterations
    );

    let engine = SpectrumEngine::new();
    let mut cases = Vec::new();
    for &size in &args.sizes {
        let mut plan = TransformPlan::new(size).map_err(|e| e.to_string())?;
        let post = SpectrumPostProcessor::new(args.sample_rate, size);
        for (t, x) in plan.input_mut().iter_mut().enumerate() {
            let phase = 2.0 * std::f64::consts::PI * 440.0 * t as f64 / f64::from(args.sample_rate);
            *x = 8_000.0 * phase.sin() + ((t * 7_919) % 97) as f64 - 48.0;
        }

        let mut latencies = Vec::with_capacity(args.iterations);
        for _ in 0..args.iterations {
            let started = Instant::now();
            engine.execute(&mut plan).map_err(|e| e.to_string())?;
            let bins = post.compute(plan.output());
            let _ = bins.peak();
            latencies.push(started.elapsed().as_secs_f64() * 1_000.0);
        }

        let avg_latency_ms = latencies.iter().sum::<f64>() / latencies.len() as f64;
        let p95 = percentile(&latencies, 0.95);
        println!("size {size}: p50 {:.3} ms, p95 {p95:.3} ms", percentile(&latencies, 0.50));
        cases.push(CaseSummary {
            transform_size: size,
            runs: latencies.len(),
            p50_latency_ms: percentile(&latencies, 0.50),
            p95_latency_ms: p95,
            avg_latency_ms,
            block_budget_ratio: p95 / block_period_ms,
        });
    }

    let summary = Summary {
        sample_rate: args.sample_rate,
        frames_per_buffer: args.frames_per_buffer,
        block_period_ms,
        iterations: args.iterations,
        cases,
    };
    let json = serde_json::to_string_pretty(&summary).map_err(|e| e.to_string())?;
    match args.output {
        Some(path) => {
            std::fs::write(&path, json).map_err(|e| e.to_string())?;
            println!("Wrote benchmark summary to {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}
