use anyhow::{Result, bail};
use clap::Parser;
use std::env;
use std::io::{self, Write};
use std::path::PathBuf;

mod collect;
mod record;
mod riot_api;

use collect::CollectArgs;
use riot_api::RiotClient;

#[derive(Parser, Debug)]
#[command(
    name = "riot-match-collect",
    about = "Collects ranked match records for winrate model training",
    version
)]
struct Cli {
    /// First match ID in the range (inclusive)
    #[arg(long)]
    start: i64,

    /// Last match ID in the range (exclusive)
    #[arg(long)]
    end: i64,

    /// Records per persisted chunk file
    #[arg(long = "batch-size", default_value_t = 1000)]
    batch_size: usize,

    /// Root directory for collected data
    #[arg(long = "out-dir", default_value = "data")]
    out_dir: PathBuf,

    /// Riot platform to collect from (e.g. KR, EUW1, NA1)
    #[arg(long, default_value = "KR")]
    platform: String,

    /// Prefix each record with its match ID
    #[arg(long = "include-match-id")]
    include_match_id: bool,

    /// Client-side request budget per two minutes
    #[arg(long = "max-req-per-2min", default_value_t = 80)]
    max_req_per_2min: usize,

    /// Seconds between progress log lines
    #[arg(long = "log-interval-secs", default_value_t = 45)]
    log_interval_secs: u64,
}

fn main() {
    let cli = Cli::parse();

    if let Err(err) = run(cli) {
        eprintln!("Error: {}", err);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    if cli.end <= cli.start {
        bail!("--end must be greater than --start");
    }

    let api_key = match env::var("RIOT_API_KEY") {
        Ok(key) if !key.trim().is_empty() => key.trim().to_string(),
        _ => prompt_api_key("Enter Riot API key: ")?,
    };

    let client = RiotClient::new(&cli.platform, api_key);
    client.set_max_reqs_per_2min(cli.max_req_per_2min);

    let args = CollectArgs {
        start_id: cli.start,
        end_id: cli.end,
        batch_size: cli.batch_size,
        out_dir: cli.out_dir,
        platform: cli.platform,
        include_match_id: cli.include_match_id,
        log_interval_secs: cli.log_interval_secs,
    };

    let mut prompt = || prompt_api_key("Enter new Riot API key: ");
    collect::collect_run(&args, &client, &mut prompt)
}

fn prompt_api_key(message: &str) -> Result<String> {
    eprint!("{}", message);
    io::stderr().flush()?;

    let mut line = String::new();
    io::stdin().read_line(&mut line)?;

    let key = line.trim();
    if key.is_empty() {
        bail!("empty API key");
    }

    Ok(key.to_string())
}
