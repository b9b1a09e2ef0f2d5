//! Mirror a device and dump its raw video stream
//!
//! Run with: cargo run --example relay [OUTPUT] [SERIAL]
//!
//! Examples:
//!   cargo run --example relay                            # count units only
//!   cargo run --example relay screen.h264                # write Annex-B to a file
//!   cargo run --example relay screen.h264 emulator-5554  # pick a device
//!
//! Play the dump with:
//!   ffplay -f h264 screen.h264
//!
//! Requires `adb` on PATH (or `./platform-tools/adb`) and the scrcpy server
//! jar at `resources/scrcpy-server.jar` or `../resources/scrcpy-server.jar`.

use std::path::PathBuf;
use std::time::Duration;

use droidmirror::{AdbGateway, MirrorConfig, MirrorHub};
use tokio::io::AsyncWriteExt;

fn print_usage() {
    eprintln!("Usage: relay [OUTPUT] [SERIAL]");
    eprintln!();
    eprintln!("  OUTPUT  file to write the raw video stream to");
    eprintln!("  SERIAL  adb serial of the device (default: first connected)");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("droidmirror=info".parse()?)
                .add_directive("relay=debug".parse()?),
        )
        .init();

    let output = args.get(1).map(PathBuf::from);

    let mut gateway = AdbGateway::detect(["platform-tools/adb", "../platform-tools/adb"]);
    if let Some(serial) = args.get(2) {
        gateway = gateway.serial(serial);
    }

    let config = MirrorConfig::default()
        .locate_server(["resources/scrcpy-server.jar", "../resources/scrcpy-server.jar"]);
    let hub = MirrorHub::new(gateway, config);

    let mut sub = match hub.subscribe_channel().await {
        Ok(sub) => sub,
        Err(e) => {
            eprintln!("Failed to start mirroring: {}", e);
            std::process::exit(1);
        }
    };

    if let Some(info) = hub.handshake_info() {
        println!(
            "Mirroring {} ({}x{}, {})",
            info.device_name,
            info.width,
            info.height,
            info.codec()
        );
    }

    let mut file = match &output {
        Some(path) => Some(tokio::fs::File::create(path).await?),
        None => None,
    };

    let mut ticker = tokio::time::interval(Duration::from_secs(5));
    loop {
        tokio::select! {
            unit = sub.recv() => {
                let Some(unit) = unit else {
                    println!("Stream ended");
                    break;
                };
                if let Some(file) = file.as_mut() {
                    file.write_all(&unit).await?;
                }
            }
            _ = ticker.tick() => {
                let stats = hub.stats();
                println!(
                    "Stats: units={} keyframe_units={} bytes={} bitrate={}bps",
                    stats.units,
                    stats.keyframe_units,
                    stats.bytes,
                    stats.bitrate(),
                );
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nShutting down...");
                break;
            }
        }
    }

    if let Some(mut file) = file {
        file.flush().await?;
    }
    hub.stop().await;

    Ok(())
}
