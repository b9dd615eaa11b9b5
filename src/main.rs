use clap::{Parser, Subcommand};
use log::{error, info};
use std::collections::HashMap;
use std::error::Error;
use std::time::Duration;
use telemetry_ingest::configuration::config::{Config, ConfigArgs, SessionArgs};
use telemetry_ingest::controller::IngestLoop;
use telemetry_ingest::network::MqttConnector;
use telemetry_ingest::publisher::field_types::{build_payload, parse_assignment, resolve_topic};
use telemetry_ingest::publisher::ConfigPublisher;
use telemetry_ingest::session_management::SessionPhase;

#[derive(Parser)]
#[command(name = "telemetry-ingest")]
#[command(version)]
#[command(about = "Records MQTT telemetry messages into CSV files")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Subscribe to a topic and append every message to the sink
    Receive {
        #[command(flatten)]
        config: ConfigArgs,
        #[command(flatten)]
        session: SessionArgs,
    },
    /// Send one configuration message to devices
    Publish {
        #[command(flatten)]
        config: ConfigArgs,
        /// Topic placeholder value, e.g. `--var locator_id=ble-pd-0C4314F46ABD`
        #[arg(long = "var", value_parser = parse_assignment)]
        vars: Vec<(String, String)>,
        /// Configuration field, e.g. `--set cteLength=160`
        #[arg(long = "set", value_parser = parse_assignment)]
        fields: Vec<(String, String)>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .format_target(false)
        .init();

    let args = Args::parse();

    let result = match args.command {
        Command::Receive { config, session } => receive(config, session).await,
        Command::Publish {
            config,
            vars,
            fields,
        } => publish(config, vars, fields).await,
    };

    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn receive(config_args: ConfigArgs, session_args: SessionArgs) -> Result<(), Box<dyn Error>> {
    let mut config = Config::load(&config_args)?;
    config.apply_session_args(&session_args);
    let session = config.session_config()?;

    let ingest = IngestLoop::new(MqttConnector::new(&config.broker));
    ingest.start(session).await?;

    let reporter = ingest.reporter();
    let mut ticker = tokio::time::interval(Duration::from_secs(config.progress.interval_secs.max(1)));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupted, stopping");
                break;
            }
            _ = ticker.tick() => {
                if reporter.log_progress().phase == SessionPhase::Idle {
                    break;
                }
            }
        }
    }

    ingest.stop().await;
    let status = ingest.status();
    info!(
        "Finished: {} message(s) persisted, {} decode error(s), {} write error(s)",
        status.message_count, status.metrics.decode_errors, status.metrics.write_errors
    );
    Ok(())
}

async fn publish(
    config_args: ConfigArgs,
    vars: Vec<(String, String)>,
    fields: Vec<(String, String)>,
) -> Result<(), Box<dyn Error>> {
    let config = Config::load(&config_args)?;
    if config.session.topic.is_empty() {
        return Err("a topic is required (--topic or [session].topic)".into());
    }

    let vars: HashMap<String, String> = vars.into_iter().collect();
    let topic = resolve_topic(&config.session.topic, &vars)?;
    let payload = build_payload(&fields)?;

    let publisher = ConfigPublisher::new(MqttConnector::new(&config.broker));
    publisher
        .publish(&config.broker.host, config.broker.port, &topic, &payload)
        .await?;
    Ok(())
}
