use clap::{Parser, Subcommand};
use std::io::{Error, ErrorKind};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use what_day_is_it::clock::SystemClock;
use what_day_is_it::config::get_configuration;
use what_day_is_it::scheduler::DeliveryScheduler;
use what_day_is_it::startup::{
    get_connection_db_pool, get_twilio_client, Application, Dependencies,
};
use what_day_is_it::storage::PostgresSubscriberStore;
use what_day_is_it::telemetry::{get_subscriber, init_subscriber};

/// Texts every subscriber what day it is, every morning.
#[derive(Parser, Debug)]
#[command(name = "what-day-is-it", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Commands {
    /// Serve the HTTP API and run the delivery loop (default).
    Serve,
    /// Deliver to everybody currently due, then exit.
    Deliver,
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let cli = Cli::parse();
    let subscriber = get_subscriber(
        String::from("what_day_is_it"),
        String::from("info"),
        std::io::stdout,
    );

    init_subscriber(subscriber);

    let config = get_configuration().map_err(|err| Error::new(ErrorKind::InvalidData, err))?;
    let store = PostgresSubscriberStore::new(get_connection_db_pool(&config.database));

    store
        .migrate()
        .await
        .map_err(|err| Error::new(ErrorKind::Other, err))?;

    let dependencies = Dependencies {
        store: Arc::new(store),
        channel: Arc::new(get_twilio_client(&config.twilio)?),
        clock: Arc::new(SystemClock),
    };
    let scheduler = DeliveryScheduler::new(&dependencies, &config.delivery)
        .map_err(|err| Error::new(ErrorKind::InvalidInput, err))?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Deliver => {
            let report = scheduler
                .drain()
                .await
                .map_err(|err| Error::new(ErrorKind::Other, format!("{:?}", err)))?;

            tracing::info!(?report, "One-shot delivery finished");

            Ok(())
        }
        Commands::Serve => {
            let application = Application::build(config, dependencies).await?;
            let cancel = CancellationToken::new();
            let delivery = tokio::spawn(scheduler.run_until_stopped(cancel.clone()));

            // The server stops on SIGINT/SIGTERM; the loop then finishes its
            // current record and returns.
            let served = application.run_until_stop().await;
            cancel.cancel();

            if let Err(err) = delivery.await {
                tracing::error!("Delivery loop panicked: {:?}", err);
            }

            served
        }
    }
}
