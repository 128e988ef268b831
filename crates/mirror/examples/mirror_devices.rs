//! Mirror one page across three emulated devices in a running Chrome
//!
//! Start Chrome with `--remote-debugging-port=9222` and pass its browser
//! WebSocket URL as the first argument.

use std::time::Duration;

use mirror::{Capability, Device, MirrorConfig, MirrorSession};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let cdp_url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "ws://localhost:9222/devtools/browser".to_string());
    let config = MirrorConfig {
        cdp_url,
        address: "https://www.rust-lang.org".to_string(),
        screenshot_dir: Some(std::env::temp_dir().join("mirror-shots")),
        ..MirrorConfig::default()
    };

    println!("Creating mirror session: {}", config.id);
    let session = MirrorSession::new(config)?;

    let mut events = session.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            println!("Event: {:?}", event);
        }
    });

    session.connect().await?;
    println!("Connected");

    let devices = [
        Device::new("iphone-13", 390, 844)
            .with_capability(Capability::Mobile)
            .with_scale_factor(3.0),
        Device::new("ipad", 820, 1180).with_capability(Capability::Mobile),
        Device::new("desktop", 1440, 900).with_capability(Capability::ResponsiveResize),
    ];
    for device in devices {
        let controller = session.open_device(device).await?;
        println!("Opened {}", controller.id());
    }

    tokio::time::sleep(Duration::from_secs(3)).await;

    let orchestrator = session.orchestrator();
    orchestrator.scroll_to_bottom();
    tokio::time::sleep(Duration::from_secs(1)).await;

    orchestrator.flip_orientation();
    tokio::time::sleep(Duration::from_secs(1)).await;

    let report = orchestrator.capture_all(None).await;
    for (device, result) in &report.results {
        match result {
            Ok(shot) => println!("{}: {} bytes at {:?}", device, shot.png.len(), shot.path),
            Err(e) => println!("{}: capture failed: {}", device, e),
        }
    }

    session.open("https://crates.io")?;
    tokio::time::sleep(Duration::from_secs(3)).await;

    session.stop().await?;
    println!("Session stopped");

    Ok(())
}
