use std::path::PathBuf;

use clap::Parser;
use tracing::info_span;
use tracing_subscriber::EnvFilter;

use insider_surveillance::store::DirStore;
use insider_surveillance::surveillance::{InsiderTradingDetector, ALERTS_CATEGORY, ALERTS_KIND, ALERTS_TABLE};
use insider_surveillance::DetectorConfig;

#[derive(Parser)]
#[command(name = "insider-surveillance", about = "Batch insider-trading surveillance over trade tables")]
struct Cli {
    /// Directory holding trades/accounts/corporate_events (.arrow or .csv); results are written beneath it
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// JSON file with detector settings; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log filter (RUST_LOG takes precedence)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Print the full run report as JSON on stdout
    #[arg(long)]
    report_json: bool,

    #[arg(long)]
    pre_announcement_window_days: Option<i64>,

    #[arg(long)]
    abnormal_volume_multiplier: Option<f64>,

    #[arg(long)]
    abnormal_return_threshold_pct: Option<f64>,

    /// Minimum post-announcement return as a fraction (0.10 = 10%)
    #[arg(long)]
    profit_threshold_pct: Option<f64>,

    #[arg(long)]
    network_time_window_days: Option<i64>,

    #[arg(long)]
    leakage_cluster_window_hours: Option<i64>,

    #[arg(long)]
    leakage_min_accounts: Option<usize>,

    #[arg(long)]
    severity_high_occurrences: Option<usize>,

    #[arg(long)]
    severity_medium_occurrences: Option<usize>,

    #[arg(long)]
    severity_low_occurrences: Option<usize>,

    /// Persist per-rule candidate tables
    #[arg(long)]
    save_intermediates: bool,

    #[arg(long)]
    min_suspicious_events: Option<usize>,

    /// Seed for synthesized events when corporate_events is missing
    #[arg(long)]
    synthetic_event_seed: Option<u64>,
}

impl Cli {
    fn resolve_config(&self) -> Result<DetectorConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => DetectorConfig::from_json_file(path)?,
            None => DetectorConfig::default(),
        };

        macro_rules! apply {
            ($($field:ident),* $(,)?) => {
                $(if let Some(v) = self.$field { config.$field = v; })*
            };
        }
        apply!(
            pre_announcement_window_days,
            abnormal_volume_multiplier,
            abnormal_return_threshold_pct,
            profit_threshold_pct,
            network_time_window_days,
            leakage_cluster_window_hours,
            leakage_min_accounts,
            severity_high_occurrences,
            severity_medium_occurrences,
            severity_low_occurrences,
            min_suspicious_events,
        );
        config.save_intermediates |= self.save_intermediates;
        if self.synthetic_event_seed.is_some() {
            config.synthetic_event_seed = self.synthetic_event_seed;
        }

        config.validate()?;
        Ok(config)
    }
}

fn init_logging(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.json_logs);

    let config = cli.resolve_config()?;
    let store = DirStore::new(&cli.data_dir);
    let span = info_span!("insider_detection", data_dir = %cli.data_dir.display());
    let detector = InsiderTradingDetector::new(config, store)?.with_span(span);

    let report = detector.run()?;

    if cli.report_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("=== insider-surveillance ===");
    println!("  Events:             {:?}", report.event_source);
    println!("  Candidates by rule:");
    for (rule, count) in &report.candidate_counts {
        println!("    {:<10} {}", rule, count);
    }
    println!();
    match &report.summary {
        Some(summary) => {
            print!("{summary}");
            println!();
            println!(
                "  Alerts written to {}",
                detector.store().output_path(ALERTS_CATEGORY, ALERTS_KIND, ALERTS_TABLE).display()
            );
        }
        None => println!("  No alerts raised."),
    }
    println!();
    println!("  Timings (microseconds):");
    for stage in &report.timings {
        println!("    {:<12} {}", stage.stage, stage.elapsed_us);
    }
    println!("    {:<12} {}", "total", report.total_us);

    Ok(())
}
