use clap::Parser;
use fclink::{Client, EngineConfig, serial};
use std::error::Error;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Telemetry rate in Hz (0 for the default rate)
    #[arg(short, long, default_value = "10")]
    rate: u32,

    /// Stop after this many events (0 to run forever)
    #[arg(short, long, default_value = "0")]
    count: usize,

    /// Baud rate
    #[arg(short, long, default_value = "115200")]
    baud: u32,

    /// Serial port path
    #[arg(short, long, default_value = "/dev/ttyACM0")]
    port: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let args = Args::parse();
    let client = Client::new(EngineConfig::default());

    client.connect(serial::open(&args.port, args.baud)?);

    let info = client
        .detect_protocol()
        .await
        .ok_or("failed to detect firmware")?;

    println!("{} {} (API {}) on {}", info.variant, info.version, info.api, info.board_id);

    let mut events = client.subscribe_telemetry();

    client.start_telemetry(args.rate);

    let mut received = 0;

    while let Ok(event) = events.recv().await {
        println!("{}: {event:?}", event.kind());

        received += 1;

        if received == args.count {
            break;
        }
    }

    client.stop_telemetry();
    println!("Skipped ticks: {}", client.telemetry_skipped_ticks());

    Ok(())
}
