use std::sync::Arc;
use std::time::Duration;

use herald_core::domain::{DeliveryOutcome, DeviceToken, NotificationPayload, Platform};
use herald_core::impls::SimulatedTransport;
use herald_core::{DispatchEngine, EngineConfig};

const DEMO_TOKENS: [&str; 3] = [
    "a1b2c3d4e5f60718293a4b5c",
    "f0e1d2c3b4a5968778695a4b",
    "0badc0ffee0badc0ffee0bad",
];

/// Token the simulated gateway rejects with `BadDeviceToken`.
const REJECTED_TOKEN: &str = "0badc0ffee0badc0ffee0bad";

/// Usage: `herald-cli [TOKEN[:ios|android]]...`
///
/// Registers every token (Android unless suffixed), sends each one a test
/// notification through the simulated gateway and waits until nothing is left
/// in progress or Ctrl+C is pressed.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "herald_core=info,herald_cli=info".into()),
        )
        .init();

    tracing::info!("herald starting...");

    let config = EngineConfig::from_env()?;
    let poll = config.poll_interval();

    let transport = Arc::new(SimulatedTransport::new().with_latency(Duration::from_millis(20)));
    transport.script(
        &DeviceToken::new(REJECTED_TOKEN),
        [DeliveryOutcome::permanent("BadDeviceToken")],
    );

    let engine = DispatchEngine::builder()
        .config(config)
        .transport(transport.clone())
        .build()?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let targets: Vec<(DeviceToken, Platform)> = if args.is_empty() {
        DEMO_TOKENS
            .iter()
            .map(|t| (DeviceToken::new(*t), Platform::Android))
            .collect()
    } else {
        args.iter()
            .map(|arg| parse_target(arg))
            .collect::<anyhow::Result<_>>()?
    };

    for (token, platform) in &targets {
        engine.register_device(token.clone(), *platform).await?;
    }

    let payload = NotificationPayload::new("herald", "test notification")
        .with_data("source", serde_json::json!("herald-cli"));
    let tokens = targets.into_iter().map(|(token, _)| token).collect();
    for (token, result) in engine.submit_bulk(tokens, payload).await? {
        if let Err(err) = result {
            tracing::warn!(device = %token.redacted(), error = %err, "submit rejected");
        }
    }

    let workers = engine.start();

    tokio::select! {
        result = wait_until_idle(&engine, poll) => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal, stopping gracefully...");
        }
    }

    workers.shutdown_and_join().await;

    let stats = engine.stats().await?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    tracing::info!(gateway_calls = transport.call_count(), "herald stopped.");
    Ok(())
}

fn parse_target(arg: &str) -> anyhow::Result<(DeviceToken, Platform)> {
    match arg.rsplit_once(':') {
        Some((token, platform)) => {
            let platform = platform.parse().map_err(anyhow::Error::msg)?;
            Ok((DeviceToken::new(token), platform))
        }
        None => Ok((DeviceToken::new(arg), Platform::Android)),
    }
}

async fn wait_until_idle(engine: &DispatchEngine, poll: Duration) -> anyhow::Result<()> {
    loop {
        let stats = engine.stats().await?;
        if stats.states.in_progress() == 0 {
            return Ok(());
        }
        tracing::debug!(in_progress = stats.states.in_progress(), "waiting for deliveries");
        tokio::time::sleep(poll).await;
    }
}
