use crate::client::{DisplayServiceClient, DisplayTransport};
use crate::config::Config;
use crate::controller::{ControllerSettings, DisplayController};
use crate::model::ConnectConfig;
use rand::{distributions::Alphanumeric, Rng};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Duration;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let command = std::env::args().nth(1);
    if command.as_deref() == Some("config-init") {
        return handle_config_init();
    }

    let config = Config::load()?;
    let client = Arc::new(build_client(&config)?);

    if let Some(command) = command {
        let args: Vec<String> = std::env::args().skip(2).collect();
        return match command.as_str() {
            "status" => handle_status(&config, client).await,
            "endpoints" => handle_endpoints(client.as_ref()).await,
            "connect" => handle_connect(&config, client.as_ref(), &args).await,
            "disconnect" => {
                client.disconnect().await?;
                println!("Display disconnected");
                Ok(())
            }
            "welcome" | "thank-you" | "write" | "clear" => {
                handle_display_command(&config, client, &command, &args).await
            }
            other => Err(format!("unknown command: {}", other).into()),
        };
    }

    run_daemon(config, client).await
}

async fn run_daemon(
    config: Config,
    client: Arc<DisplayServiceClient>,
) -> Result<(), Box<dyn std::error::Error>> {
    let controller = DisplayController::new(client, ControllerSettings::from_config(&config));
    controller.start_monitor();
    tracing::info!(service = %config.service.base_url, "pole display bridge started");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let server_task = if config.server.enabled {
        let addr: SocketAddr = format!("127.0.0.1:{}", config.server.port).parse()?;
        let token = config
            .server
            .token
            .clone()
            .unwrap_or_else(|| generate_token(32));
        println!(
            "Operator status: http://127.0.0.1:{}/status?token={}",
            config.server.port, token
        );
        let server_controller = controller.clone();
        Some(tokio::spawn(async move {
            if let Err(err) =
                crate::server::start(addr, token, server_controller, shutdown_rx).await
            {
                tracing::error!(error = %err, "operator server failed");
            }
        }))
    } else {
        None
    };

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown: ctrl-c");

    let _ = shutdown_tx.send(true);
    controller.shutdown().await;
    if let Some(task) = server_task {
        let _ = task.await;
    }
    Ok(())
}

fn handle_config_init() -> Result<(), Box<dyn std::error::Error>> {
    let path = Config::default_path();
    Config::write_default(&path)?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}

async fn handle_status(
    config: &Config,
    client: Arc<DisplayServiceClient>,
) -> Result<(), Box<dyn std::error::Error>> {
    let controller = DisplayController::new(client, ControllerSettings::from_config(config));
    controller.reconnect().await;
    println!("{}", serde_json::to_string_pretty(&controller.snapshot())?);
    Ok(())
}

async fn handle_endpoints(client: &DisplayServiceClient) -> Result<(), Box<dyn std::error::Error>> {
    let endpoints = client.list_endpoints().await?;
    if endpoints.is_empty() {
        println!("No display endpoints found");
    }
    for endpoint in endpoints {
        match endpoint.description {
            Some(desc) => println!("{}\t{}", endpoint.path, desc),
            None => println!("{}", endpoint.path),
        }
    }
    Ok(())
}

async fn handle_connect(
    config: &Config,
    client: &DisplayServiceClient,
    args: &[String],
) -> Result<(), Box<dyn std::error::Error>> {
    let endpoint = args
        .first()
        .cloned()
        .or_else(|| config.display.endpoint.clone())
        .ok_or("missing endpoint (usage: connect <endpoint>)")?;
    let connect_config = ConnectConfig {
        baud_rate: config.display.baud_rate,
    };
    client.connect(&endpoint, &connect_config).await?;
    tracing::info!(endpoint = %endpoint, baud_rate = connect_config.baud_rate, "display connected");
    println!("Connected display at {}", endpoint);
    Ok(())
}

/// One-shot display commands go through the controller so they get the same
/// status gate and error reporting as the daemon.
async fn handle_display_command(
    config: &Config,
    client: Arc<DisplayServiceClient>,
    command: &str,
    args: &[String],
) -> Result<(), Box<dyn std::error::Error>> {
    let controller = DisplayController::new(client, ControllerSettings::from_config(config));
    controller.reconnect().await;

    let shown = match command {
        "welcome" => controller.display_welcome().await,
        "thank-you" => controller.display_thank_you().await,
        "clear" => controller.clear().await,
        _ => {
            let line1 = args.first().ok_or("missing line (usage: write <line1> [line2])")?;
            let line2 = args.get(1).map(String::as_str).unwrap_or("");
            controller.write_lines(line1, line2).await
        }
    };

    if shown {
        println!("ok");
        Ok(())
    } else {
        let reason = controller
            .current_error()
            .unwrap_or_else(|| "display not connected".to_string());
        Err(reason.into())
    }
}

fn build_client(config: &Config) -> Result<DisplayServiceClient, Box<dyn std::error::Error>> {
    let api_key = config
        .service
        .api_key
        .as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string);
    Ok(DisplayServiceClient::builder(config.service.base_url.trim())
        .api_key(api_key)
        .timeout(Duration::from_secs(config.service.timeout_secs))
        .build()?)
}

fn generate_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
