use clap::Parser;
use fclink::{Client, EngineConfig, cli::CliOutcome, serial};
use std::{error::Error, sync::Arc};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Console lines to send, e.g. `"get roll_rate"` or `"diff all"`
    #[arg(required = true)]
    lines: Vec<String>,

    /// Leave the console with `save` instead of `exit`
    #[arg(short, long, default_value = "false")]
    save: bool,

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

    client.set_connector(Arc::new(serial::SerialConnector::new(&args.port, args.baud)));
    client.connect(serial::open(&args.port, args.baud)?);
    client.enter_cli().await?;

    for line in &args.lines {
        // Listings can take longer than a single line window
        let response = if line.starts_with("dump") || line.starts_with("diff") {
            client.cli_dump(line).await?
        } else {
            match client.cli_command(line).await? {
                CliOutcome::Rejected(err) => {
                    eprintln!("{line}: {err}");
                    continue;
                }
                CliOutcome::Accepted => continue,
                CliOutcome::Value(val) => val,
                CliOutcome::Unrecognized(text) => text,
            }
        };

        println!("{response}");
    }

    client.exit_cli(args.save).await?;

    Ok(())
}
