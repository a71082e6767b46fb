use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use flowbench::config::FlowbenchConfig;
use flowbench::lab::Lab;
use flowbench::planner::PlanOptions;
use flowbench::BenchRequest;

#[derive(Parser)]
#[command(
    name = "flowbench",
    about = "Latency and throughput benchmarking for multi-host network labs",
    version,
    long_about = None
)]
struct Cli {
    /// Config file (defaults: $FLOWBENCH_CONFIG, then ./flowbench.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ping and iperf3 every planned flow, then save CSV + counter dump
    Run {
        /// Label for this run, copied into every row and the output file names
        scenario: String,

        #[command(flatten)]
        flows: FlowArgs,

        /// ICMP echo requests per flow
        #[arg(long = "ping")]
        ping_count: Option<u32>,

        /// Seconds per iperf3 run
        #[arg(long = "iperf")]
        iperf_secs: Option<u32>,

        /// Parallel iperf3 streams
        #[arg(long)]
        streams: Option<u32>,

        /// Flows tested concurrently
        #[arg(long)]
        workers: Option<usize>,

        /// Seconds to wait for iperf3 servers
        #[arg(long)]
        ready_timeout: Option<u64>,

        /// Directory for the CSV and counter files
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },

    /// List lab endpoints with their zone and address
    Discover,

    /// Show the flows a run would test, without probing
    Plan {
        #[command(flatten)]
        flows: FlowArgs,
    },
}

#[derive(Args)]
struct FlowArgs {
    /// Only test flows between different zones
    #[arg(long)]
    cross_zone_only: bool,

    /// Randomly pick N flows after optional filters (0 = all)
    #[arg(long, default_value = "0")]
    sample: usize,

    /// Seed for --sample
    #[arg(long)]
    seed: Option<u64>,
}

impl FlowArgs {
    fn apply(&self, req: &mut BenchRequest) {
        req.plan = PlanOptions {
            cross_zone_only: self.cross_zone_only,
            sample_size: self.sample,
        };
        if self.seed.is_some() {
            req.seed = self.seed;
        }
    }
}

fn init_tracing(config: &FlowbenchConfig, json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json || config.logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = FlowbenchConfig::resolve(cli.config.as_deref())?;
    init_tracing(&config, cli.json_logs);

    let lab = Lab::docker(&config.lab);

    match cli.command {
        Commands::Run {
            scenario,
            flows,
            ping_count,
            iperf_secs,
            streams,
            workers,
            ready_timeout,
            output_dir,
        } => {
            let mut req = BenchRequest::from_config(&config, scenario);
            flows.apply(&mut req);
            if let Some(n) = ping_count {
                req.probe.ping_count = n;
            }
            if let Some(secs) = iperf_secs {
                req.probe.duration_secs = secs;
            }
            if let Some(n) = streams {
                req.probe.streams = n;
            }
            if let Some(n) = workers {
                req.workers = n;
            }
            if let Some(secs) = ready_timeout {
                req.readiness_timeout = std::time::Duration::from_secs(secs);
            }
            if let Some(dir) = output_dir {
                req.output_dir = dir;
            }

            tracing::info!(scenario = %req.scenario, plan = ?req.plan, workers = req.workers, "Running benchmark");
            println!(
                "\n=== {} | v{} | ping {} | iperf {}s x{} | workers {} ===",
                req.scenario,
                env!("CARGO_PKG_VERSION"),
                req.probe.ping_count,
                req.probe.duration_secs,
                req.probe.streams,
                req.workers
            );

            let outcome = flowbench::run_benchmark(&lab, &req, |record| {
                println!("{}", flowbench::report::format_flow_line(record));
            })
            .await?;

            println!(
                "\n{} flows across {} endpoints",
                outcome.records.len(),
                outcome.endpoints.len()
            );
            println!("Saved results → {}", outcome.csv_path.display());
            println!("Saved iptables counters → {}\n", outcome.counters_path.display());
        }
        Commands::Discover => {
            let endpoints = flowbench::lab::discover(&*lab.control, &config.lab.naming()).await?;
            println!("{:<35} | {:<12} | Address", "Endpoint", "Zone");
            println!("{:-<35}-|-{:-<12}-|-{:-<15}", "", "", "");
            for ep in endpoints {
                println!("{:<35} | {:<12} | {}", ep.name, ep.zone, ep.address);
            }
        }
        Commands::Plan { flows } => {
            let mut req = BenchRequest::from_config(&config, "plan");
            flows.apply(&mut req);
            let (endpoints, pairs) = flowbench::plan_flows(&lab, &req).await?;
            println!(
                "{} flows across {} endpoints:",
                pairs.len(),
                endpoints.len()
            );
            for pair in pairs {
                println!(
                    "  {} ➜ {} ({} ➜ {})",
                    req.naming.display_name(&pair.source.name),
                    req.naming.display_name(&pair.destination.name),
                    pair.source.zone,
                    pair.destination.zone
                );
            }
        }
    }

    Ok(())
}
