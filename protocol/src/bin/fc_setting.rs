use clap::Parser;
use fclink::{Client, EngineConfig, serial, settings::SettingValue};
use std::{error::Error, sync::Arc};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Setting name, e.g. `nav_rth_altitude`
    name: String,

    /// New value; the current value is printed if omitted
    value: Option<String>,

    /// Persist the new value (reboots the flight controller)
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
    client
        .detect_protocol()
        .await
        .ok_or("failed to detect firmware")?;

    let Some(value) = args.value else {
        let val = client
            .get_setting(&args.name)
            .await
            .ok_or("failed to read setting")?;

        println!("{} = {val}", args.name);

        return Ok(());
    };

    if !client.set_setting(&args.name, &SettingValue::from_cli(&value)).await {
        return Err("failed to write setting".into());
    }

    if args.save {
        if !client.save_to_nonvolatile().await {
            return Err("failed to save configuration".into());
        }
    } else if client.mode() == fclink::cli::ConnectionMode::Cli {
        client.exit_cli(false).await?;
    }

    println!("{} set to {value}", args.name);

    Ok(())
}
