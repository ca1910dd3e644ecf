use clap::Parser;
use nsperf::{Client, Config, RateSample};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "nsperf")]
#[command(about = "iperf3 control-protocol client for driving throughput tests", long_about = None)]
#[command(version)]
struct Cli {
    /// Server address to connect to
    server: String,

    /// Control port (stream i connects to port + i)
    #[arg(short, long, default_value = "5201")]
    port: u16,

    /// Test duration in seconds
    #[arg(short = 't', long, default_value = "10")]
    time: u64,

    /// Warm-up seconds omitted from the measured duration
    #[arg(short = 'O', long, default_value = "0")]
    omit: u64,

    /// Number of parallel streams
    #[arg(short = 'P', long, default_value = "1")]
    parallel: u16,

    /// Negotiated block length in bytes
    #[arg(short = 'l', long, default_value = "131072")]
    length: usize,

    /// Interval for periodic reports in seconds
    #[arg(short, long, default_value = "1")]
    interval: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let config = Config::client(cli.server)
        .with_port(cli.port)
        .with_time(Duration::from_secs(cli.time))
        .with_omit(Duration::from_secs(cli.omit))
        .with_parallel(cli.parallel)
        .with_len(cli.length)
        .with_interval(Duration::from_secs(cli.interval));

    let (samples_tx, mut samples_rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        println!("[ ID] Interval           Transfer        Bitrate");
        while let Some(sample) = samples_rx.recv().await {
            print_sample(&sample);
        }
    });

    let client = Client::new(config).with_sample_sink(samples_tx);
    let result = client.run().await;
    let total = client.bytes_sent();
    drop(client);
    printer.await?;
    result?;

    println!("sent {total} bytes");
    Ok(())
}

fn print_sample(sample: &RateSample) {
    let (transfer, transfer_unit) = if sample.bytes >= 1_000_000_000 {
        (sample.bytes as f64 / 1e9, "GBytes")
    } else if sample.bytes >= 1_000_000 {
        (sample.bytes as f64 / 1e6, "MBytes")
    } else {
        (sample.bytes as f64 / 1e3, "KBytes")
    };

    let (bitrate, bitrate_unit) = if sample.bits_per_second >= 1e9 {
        (sample.bits_per_second / 1e9, "Gbits/sec")
    } else {
        (sample.bits_per_second / 1e6, "Mbits/sec")
    };

    println!(
        "[SUM]   {:4.2}-{:4.2}  sec  {:6.2} {:>7}  {:6.1} {:>10}",
        sample.start.as_secs_f64(),
        sample.end.as_secs_f64(),
        transfer,
        transfer_unit,
        bitrate,
        bitrate_unit
    );
}
