// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use ecnspider::{
    ecn::{self, EcnCtl},
    Config, Result, Spider,
};
use std::{path::PathBuf, sync::Arc, time::Duration};
use structopt::StructOpt;
use tracing::info;
use tracing_subscriber::{
    filter::LevelFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, Layer,
};

const VERBOSITY_VALUES: &[&str] = &["CRITICAL", "ERROR", "WARNING", "INFO", "DEBUG"];

#[derive(Debug, StructOpt)]
#[structopt(
    name = "ecnspider",
    about = "Crawl web hosts over TCP connections with and without ECN negotiation."
)]
pub struct Args {
    /// CSV input with one "rank,domain,ipv4,ipv6" record per line
    pub input: PathBuf,

    /// CSV output listing the targets that should be probed in another run
    pub retry_output: PathBuf,

    /// CSV output receiving one result row per probed address
    pub output: PathBuf,

    /// File receiving the full debug log of the run
    pub logfile: PathBuf,

    /// Verbosity of logging to stdout; the logfile always gets everything
    #[structopt(long, short = "v", default_value = "DEBUG", possible_values = VERBOSITY_VALUES)]
    pub verbosity: String,

    /// Number of worker tasks performing HTTP requests
    #[structopt(long, short = "w", default_value = "5")]
    pub workers: usize,

    /// Timeout in seconds for connection setup and requests
    #[structopt(long, short = "t", default_value = "10")]
    pub timeout: u64,

    /// Do not require a running tcpdump process at startup
    #[structopt(long)]
    pub no_tcpdump_check: bool,

    /// Write the HTTP response headers into the output rows
    #[structopt(long, short = "s")]
    pub save_headers: bool,

    /// Skip IPv6 addresses; for machines without an IPv6 route
    #[structopt(long = "no-IPv6", short = "6")]
    pub no_ipv6: bool,

    /// Probe at most N input records; all of them when 0
    #[structopt(long, short = "d", default_value = "0")]
    pub debug_count: u64,

    /// Debugging only: skip the ECN-on connect when the ECN-off connect
    /// timed out
    #[structopt(long, short = "f")]
    pub fast_fail: bool,
}

impl Args {
    fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err("workers must be a positive integer".into());
        }
        if self.timeout == 0 {
            return Err("timeout must be a positive integer".into());
        }
        Ok(())
    }

    fn config(&self) -> Config {
        let mut config = Config::new(&self.input, &self.retry_output, &self.output);
        config.workers = self.workers;
        config.timeout = Duration::from_secs(self.timeout);
        config.save_headers = self.save_headers;
        config.no_ipv6 = self.no_ipv6;
        config.debug_count = self.debug_count;
        config.fast_fail = self.fast_fail;
        config
    }

    fn stdout_level(&self) -> LevelFilter {
        match self.verbosity.as_str() {
            // no distinct level above error
            "CRITICAL" | "ERROR" => LevelFilter::ERROR,
            "WARNING" => LevelFilter::WARN,
            "INFO" => LevelFilter::INFO,
            _ => LevelFilter::DEBUG,
        }
    }
}

fn init_logging(args: &Args) -> Result<()> {
    let logfile = std::fs::File::create(&args.logfile)?;

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(Arc::new(logfile))
                .with_ansi(false)
                .with_filter(LevelFilter::DEBUG),
        )
        .with(
            fmt::layer()
                .compact()
                .with_filter(args.stdout_level()),
        )
        .init();
    Ok(())
}

/// A packet capture running next to the crawl is what makes the output
/// usable for offline ECN analysis, so its absence is an error by default.
fn ensure_tcpdump() -> Result<()> {
    use sysinfo::{ProcessExt, System, SystemExt};

    let system = System::new_all();
    let running = system
        .processes()
        .values()
        .any(|process| process.name().contains("tcpdump"));
    if running {
        Ok(())
    } else {
        Err("no tcpdump process is running; pass --no-tcpdump-check to skip this check".into())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::from_args();
    args.validate()?;

    if !args.no_tcpdump_check {
        ensure_tcpdump()?;
    }

    let ecn_ctl = Arc::new(ecn::Sysctl::default());
    if let Err(err) = ecn::check(ecn_ctl.as_ref()) {
        eprintln!(
            "cannot drive the kernel ECN setting ({}); make sure \
             \"sudo -n /sbin/sysctl -w net.ipv4.tcp_ecn=$MODE\" works without \
             a password prompt for MODE = 0, 1 and 2",
            err
        );
        std::process::exit(1);
    }

    init_logging(&args)?;
    info!(
        "logging to {} at {} stdout verbosity",
        args.logfile.display(),
        args.verbosity
    );
    info!(
        "platform: {} {}",
        std::env::consts::OS,
        std::env::consts::ARCH
    );
    info!("kernel ECN mode: {:?}", ecn_ctl.get()?);

    Spider::new(args.config(), ecn_ctl as Arc<dyn EcnCtl>)
        .run()
        .await
}
