//! Budget Optimization Demo
//!
//! Runs one enhancement request against illustrative channel priors (or a
//! priors file) and prints the result as a readable summary or raw JSON.
//!
//! Usage:
//!   optimize_demo [OPTIONS]
//!
//! Options:
//!   --budget <USD>       Total budget to allocate (default: 50000)
//!   --goal <GOAL>        demos, revenue or cac (default: demos)
//!   --level <LEVEL>      fast, standard or thorough (default: standard)
//!   --priors <FILE>      JSON file with per-channel cpm/ctr/cvr intervals
//!   --min <CH=FRAC>      Per-channel floor, repeatable (e.g. --min google=0.2)
//!   --max <CH=FRAC>      Per-channel ceiling, repeatable
//!   --seed <N>           RNG seed for a reproducible run
//!   --format <FMT>       summary or json (default: summary)
//!
//! Example:
//!   optimize_demo --goal revenue --deal-size 4000 --min linkedin=0.1 --format json

use clap::Parser;
use tracing_subscriber::filter::EnvFilter;

use mixopt::{
    Allocation, Assumptions, Channel, ChannelMetrics, ChannelPriors, EnhanceOptions,
    EnhancedModelResult, EnhancementService, Goal, Interval, PerChannel, QualityLevel,
};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser)]
#[command(name = "optimize_demo")]
#[command(version, about = "Run one budget-allocation request end to end")]
struct Cli {
    /// Total budget in dollars
    #[arg(long, default_value = "50000")]
    budget: f64,

    /// Optimization goal: demos, revenue, cac
    #[arg(long, default_value = "demos")]
    goal: String,

    /// Average deal size in dollars (required for --goal revenue)
    #[arg(long)]
    deal_size: Option<f64>,

    /// Target cost per acquisition (informational)
    #[arg(long)]
    target_cac: Option<f64>,

    /// Quality level: fast, standard, thorough
    #[arg(long, default_value = "standard")]
    level: String,

    /// JSON file with channel priors; bundled defaults when omitted
    #[arg(long)]
    priors: Option<String>,

    /// Per-channel share floor, e.g. google=0.2 (repeatable)
    #[arg(long = "min", value_name = "CH=FRAC")]
    min: Vec<String>,

    /// Per-channel share ceiling, e.g. tiktok=0.3 (repeatable)
    #[arg(long = "max", value_name = "CH=FRAC")]
    max: Vec<String>,

    /// Validation-stage timeout override in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// RNG seed for reproducible output
    #[arg(long)]
    seed: Option<u64>,

    /// Skip the alternatives block
    #[arg(long)]
    no_alternatives: bool,

    /// Output format: summary, json
    #[arg(long, default_value = "summary")]
    format: String,
}

// ============================================================================
// Setup helpers
// ============================================================================

/// Plausible mid-market SaaS priors, used when no priors file is given.
fn default_priors() -> ChannelPriors {
    PerChannel {
        google: ChannelMetrics {
            cpm: Interval::new(20.0, 45.0),
            ctr: Interval::new(0.02, 0.05),
            cvr: Interval::new(0.02, 0.06),
        },
        meta: ChannelMetrics {
            cpm: Interval::new(8.0, 22.0),
            ctr: Interval::new(0.008, 0.02),
            cvr: Interval::new(0.01, 0.03),
        },
        tiktok: ChannelMetrics {
            cpm: Interval::new(5.0, 15.0),
            ctr: Interval::new(0.005, 0.015),
            cvr: Interval::new(0.004, 0.015),
        },
        linkedin: ChannelMetrics {
            cpm: Interval::new(30.0, 80.0),
            ctr: Interval::new(0.004, 0.01),
            cvr: Interval::new(0.03, 0.09),
        },
    }
}

fn load_priors(path: &str) -> Result<ChannelPriors, Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

fn parse_channel(s: &str) -> Result<Channel, String> {
    match s {
        "google" => Ok(Channel::Google),
        "meta" => Ok(Channel::Meta),
        "tiktok" => Ok(Channel::Tiktok),
        "linkedin" => Ok(Channel::Linkedin),
        other => Err(format!("unknown channel '{other}'")),
    }
}

/// Parse a repeated `channel=fraction` constraint argument.
fn parse_bound(spec: &str) -> Result<(Channel, f64), String> {
    let (ch, frac) = spec
        .split_once('=')
        .ok_or_else(|| format!("expected CH=FRAC, got '{spec}'"))?;
    let channel = parse_channel(ch.trim())?;
    let fraction: f64 = frac
        .trim()
        .parse()
        .map_err(|_| format!("'{frac}' is not a number"))?;
    Ok((channel, fraction))
}

fn parse_goal(s: &str) -> Result<Goal, String> {
    match s.to_lowercase().as_str() {
        "demos" => Ok(Goal::Demos),
        "revenue" => Ok(Goal::Revenue),
        "cac" => Ok(Goal::Cac),
        other => Err(format!("unknown goal '{other}' (demos, revenue, cac)")),
    }
}

// ============================================================================
// Output
// ============================================================================

fn print_summary(result: &EnhancedModelResult) {
    println!();
    println!("Goal: {}   Budget: ${:.0}", result.goal.as_str(), result.budget);
    println!();
    println!("  Allocation                     Spend       Confidence");
    for &ch in &Channel::ALL {
        println!(
            "  {:<10} {:>6.1}%   {:>12.0}          {:>5.2}",
            ch.as_str(),
            result.allocation.get(ch) * 100.0,
            result.budget * result.allocation.get(ch),
            result.confidence.per_channel.value(ch),
        );
    }
    println!();
    println!(
        "  Performance: {:.2}   (p10 {:.2} / p50 {:.2} / p90 {:.2})",
        result.performance, result.outcome.p10, result.outcome.p50, result.outcome.p90
    );
    println!(
        "  Confidence:  {:.2}   agreement {:.2}, stability {:.2}, {} algorithm(s), {} outlier(s)",
        result.confidence.overall,
        result.confidence.consensus.agreement,
        result.confidence.stability,
        result.confidence.algorithms.len(),
        result.confidence.consensus.outlier_count,
    );

    if !result.validation.warnings.is_empty() {
        println!();
        println!("  Warnings:");
        for w in &result.validation.warnings {
            println!("    [{:?}] {}", w.severity, w.message);
        }
    }
    for w in &result.validation.benchmark.warnings {
        println!("    [{:?}] {}", w.severity, w.message);
    }

    if !result.alternatives.top_allocations.is_empty() {
        println!();
        println!("  Alternatives:");
        for (i, alt) in result.alternatives.top_allocations.iter().enumerate() {
            println!(
                "    {}. {} — score {:.2}, {}",
                i + 1,
                format_allocation(&alt.allocation),
                alt.score,
                alt.reasoning
            );
        }
    }
    println!();
}

fn format_allocation(allocation: &Allocation) -> String {
    Channel::ALL
        .iter()
        .map(|&ch| format!("{} {:.0}%", ch.as_str(), allocation.get(ch) * 100.0))
        .collect::<Vec<_>>()
        .join(", ")
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let priors = match &cli.priors {
        Some(path) => load_priors(path)?,
        None => default_priors(),
    };

    let mut assumptions = Assumptions::new(parse_goal(&cli.goal)?);
    assumptions.avg_deal_size = cli.deal_size;
    assumptions.target_cac = cli.target_cac;
    for spec in &cli.min {
        let (channel, fraction) = parse_bound(spec)?;
        assumptions.min_pct.set(channel, fraction);
    }
    for spec in &cli.max {
        let (channel, fraction) = parse_bound(spec)?;
        assumptions.max_pct.set(channel, fraction);
    }

    let mut options = EnhanceOptions::with_level(QualityLevel::parse(&cli.level));
    options.timeout_ms = cli.timeout_ms;
    options.seed = cli.seed;
    options.include_alternatives = !cli.no_alternatives;

    let service = EnhancementService::new();
    let result = service
        .enhance(cli.budget, priors, assumptions, options)
        .await?;

    match cli.format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_summary(&result),
    }
    Ok(())
}
