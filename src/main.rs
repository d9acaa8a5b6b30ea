use std::env;
use std::io;
use std::process::ExitCode;

use order_eng::Engine;
use order_eng::config::Config;
use order_eng::csv::{CsvError, read_commands, write_inventory};
use order_eng::gateway::{OfflineGateway, PaymentGateway, RazorpayGateway};
use order_eng::replay::{Command, Replayer};
use order_eng::store::{MemoryStore, Store};
#[cfg(feature = "postgres")]
use order_eng::store::{PgStore, StoreError};
use secrecy::SecretString;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::WARN.into())
                .from_env_lossy(),
        )
        .with_writer(io::stderr)
        .init();

    let Some(path) = env::args().nth(1) else {
        eprintln!("usage: order-eng <script.csv>");
        return ExitCode::FAILURE;
    };

    if !path.ends_with(".csv") {
        warn!(path, "input file seems to not be a csv file");
    }

    let commands = match read_commands(path) {
        Ok(commands) => commands,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let config = Config::from_env().unwrap_or_else(|e| {
        warn!(reason = %e, "no payment configuration, signing with an ephemeral secret");
        Config {
            database_url: env::var("DATABASE_URL").ok().map(SecretString::from),
            ..Config::offline()
        }
    });

    match &config.database_url {
        #[cfg(feature = "postgres")]
        Some(url) => {
            let store = match connect(url).await {
                Ok(store) => store,
                Err(e) => {
                    error!("database unavailable: {e}");
                    return ExitCode::FAILURE;
                }
            };
            with_gateway(store, &config, commands).await
        }
        #[cfg(not(feature = "postgres"))]
        Some(_) => {
            warn!("DATABASE_URL is set but postgres support is not compiled in");
            with_gateway(MemoryStore::new(), &config, commands).await
        }
        None => with_gateway(MemoryStore::new(), &config, commands).await,
    }
}

#[cfg(feature = "postgres")]
async fn connect(url: &SecretString) -> Result<PgStore, StoreError> {
    let store = PgStore::connect(url).await?;
    store.migrate().await?;
    info!("using postgres store");
    Ok(store)
}

/// The hosted gateway needs an API key id; without one orders are opened locally.
async fn with_gateway<S: Store>(
    store: S,
    config: &Config,
    commands: impl Iterator<Item = Result<Command, CsvError>> + Send + 'static,
) -> ExitCode {
    if config.payment.key_id.is_empty() {
        replay(Engine::new(store, OfflineGateway, &config.payment), commands).await
    } else {
        info!(api_base = %config.payment.api_base, "using hosted payment gateway");
        let gateway = RazorpayGateway::new(&config.payment);
        replay(Engine::new(store, gateway, &config.payment), commands).await
    }
}

async fn replay<S: Store, G: PaymentGateway>(
    engine: Engine<S, G>,
    commands: impl Iterator<Item = Result<Command, CsvError>> + Send + 'static,
) -> ExitCode {
    let replayer = Replayer::new(engine);

    let (sender, receiver) = tokio::sync::mpsc::channel(16);
    let reader = tokio::spawn(async move {
        for result in commands {
            match result {
                Ok(command) => {
                    if sender.send(command).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!("{e}"),
            }
        }
    });

    replayer.run(ReceiverStream::new(receiver)).await;
    if let Err(e) = reader.await {
        error!("script reader failed: {e}");
        return ExitCode::FAILURE;
    }

    let report = match replayer.engine().inventory_report().await {
        Ok(report) => report,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = write_inventory(io::stdout().lock(), &report) {
        error!("failed to write inventory report: {e}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
