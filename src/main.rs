// src/main.rs

use anyhow::{Context, Result};
use clap::Parser;
use cloud_ping::prelude::*;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};

#[derive(Parser)]
#[command(name = "cloud-ping")]
#[command(about = "Ping for cloud URLs: time repeated GETs against http, S3 and CloudFront targets")]
#[command(version)]
struct Cli {
    /// Ping the given URLs until stopped. Ctrl-C prints statistics and stops,
    /// a second Ctrl-C exits immediately.
    #[arg(short = 't', long)]
    repeat: bool,
    #[arg(short = 'n', long, default_value_t = 1, help = "Send 'count' rounds of requests")]
    count: u64,
    #[arg(
        short,
        long,
        default_value = ":",
        help = "Range [start, end) of the request data: 0:1024, 100:, :1024"
    )]
    range: ByteRange,
    #[arg(short, long, default_value_t = 0, help = "Limit received data to 'length' bytes")]
    length: u64,
    #[arg(short, long, default_value_t = 1, help = "Wait 'interval' seconds between rounds")]
    interval: u64,
    #[arg(short, long, help = "Print detailed output")]
    verbose: bool,
    /// Authentication string: '<access-key>:<secret-key>' for S3,
    /// '<key-pair-id>:<private-key-path>' for CloudFront.
    #[arg(short, long, default_value = "")]
    auth: String,
    #[arg(long, default_value_t = DEFAULT_CLOUDFRONT_TTL.as_secs(), help = "Lifetime of CloudFront signed URLs, in seconds")]
    cf_ttl: u64,
    /// URLs to probe: http://some-server.com/file1, s3://test-bucket/file1,
    /// s3://host:test-bucket/file1, cf://dgdfdf3b.cloudfront.net/1.bin
    #[arg(required = true, value_name = "URL")]
    urls: Vec<String>,
}

/// First Ctrl-C drains the run, the second one exits without a summary.
fn spawn_interrupt_handler(drain: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        info!("interrupt received, finishing current round");
        drain.cancel();
        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(1);
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { Level::INFO } else { Level::ERROR })
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    let options = RunOptions {
        count: cli.count,
        interval: Duration::from_secs(cli.interval),
        repeat: cli.repeat,
    };
    let limits = Limits {
        range: cli.range,
        recv_limit: cli.length,
    };

    let mut prober = Prober::new(options).with_cloudfront_ttl(Duration::from_secs(cli.cf_ttl));
    for url in &cli.urls {
        prober.add_connection(url, &cli.auth, limits);
    }

    let ctx = match ProbeContext::init() {
        Ok(ctx) => ctx,
        Err(e) => {
            error!("Failed to initialize http request infrastructure: {}", e);
            return Err(e).context("initialization failed");
        }
    };

    let drain = CancellationToken::new();
    spawn_interrupt_handler(drain.clone());

    prober.run(&ctx, &drain).await;
    drop(ctx);
    Ok(())
}
