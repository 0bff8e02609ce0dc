use actix_web::dev::Server;
use actix_web::{web, App, HttpServer};
use chrono_tz::Tz;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::io::{Error, ErrorKind};
use std::net::TcpListener;
use std::sync::Arc;
use tracing_actix_web::TracingLogger;

use crate::clock::Clock;
use crate::config::{DatabaseSettings, Settings, TwilioSettings};
use crate::routes::{handle_create_subscription, handle_incoming_message, health_check};
use crate::sms_client::{OutboundChannel, TwilioClient};
use crate::storage::SubscriberStore;

/// Zone given to subscribers who don't pick a valid one.
pub struct DefaultTimeZone(pub Tz);

/// Collaborators shared by the HTTP handlers and the delivery loop.
#[derive(Clone)]
pub struct Dependencies {
    pub store: Arc<dyn SubscriberStore>,
    pub channel: Arc<dyn OutboundChannel>,
    pub clock: Arc<dyn Clock>,
}

pub struct Application {
    pub port: u16,
    pub server: Server,
}

impl Application {
    pub async fn build(config: Settings, dependencies: Dependencies) -> Result<Self, Error> {
        let default_timezone = config
            .get_default_timezone()
            .map_err(|err| Error::new(ErrorKind::InvalidInput, err))?;

        let listener = TcpListener::bind(config.get_address())?;
        let port = listener.local_addr()?.port();
        let server = run(listener, dependencies, default_timezone)?;

        tracing::info!("Server listening on {}:{}", config.application.host, port);

        Ok(Self { port, server })
    }

    pub fn get_port(&self) -> u16 {
        self.port
    }

    pub async fn run_until_stop(self) -> Result<(), Error> {
        self.server.await
    }
}

pub fn run(
    listener: TcpListener,
    dependencies: Dependencies,
    default_timezone: Tz,
) -> Result<Server, Error> {
    let store: web::Data<dyn SubscriberStore> = web::Data::from(dependencies.store);
    let channel: web::Data<dyn OutboundChannel> = web::Data::from(dependencies.channel);
    let clock: web::Data<dyn Clock> = web::Data::from(dependencies.clock);
    let default_timezone = web::Data::new(DefaultTimeZone(default_timezone));

    let server = HttpServer::new(move || {
        // App is where your application logic lives: routing, middlewares, request handler, etc
        App::new()
            // 'wrap' method adds a middleware to the App. This specific middleware provide incoming
            // request logger
            .wrap(TracingLogger::default())
            .route("/api/health", web::get().to(health_check))
            .route("/api/subscribe", web::post().to(handle_create_subscription))
            .route(
                "/api/incoming-message",
                web::post().to(handle_incoming_message),
            )
            .app_data(store.clone())
            .app_data(channel.clone())
            .app_data(clock.clone())
            .app_data(default_timezone.clone())
    })
    .listen(listener)?
    .run();

    Ok(server)
}

pub fn get_connection_db_pool(config: &DatabaseSettings) -> PgPool {
    PgPoolOptions::new()
        .acquire_timeout(std::time::Duration::from_secs(2))
        .connect_lazy_with(config.get_db_options())
}

pub fn get_twilio_client(config: &TwilioSettings) -> Result<TwilioClient, Error> {
    let sender = config
        .get_sender()
        .map_err(|err| Error::new(ErrorKind::InvalidInput, err))?;

    TwilioClient::new(
        config.base_url.clone(),
        config.account_sid.clone(),
        sender,
        config.auth_token.clone(),
        Some(config.get_timeout()),
    )
    .map_err(|err| Error::new(ErrorKind::Other, err))
}
