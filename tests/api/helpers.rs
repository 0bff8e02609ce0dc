use chrono::{DateTime, Utc};
use reqwest::Response;
use sqlx::{Connection, Executor, PgConnection, PgPool};
use std::sync::{Arc, Once};
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use what_day_is_it::{
    clock::{Clock, FixedClock},
    config::{get_configuration, DatabaseSettings, Settings},
    domain::phone_number::PhoneNumber,
    scheduler::DeliveryScheduler,
    startup::{get_connection_db_pool, get_twilio_client, Application, Dependencies},
    storage::{InMemorySubscriberStore, PostgresSubscriberStore},
    telemetry::{get_subscriber, init_subscriber},
};

pub const NUMBER: &str = "+15554443333";

static TRACING: Once = Once::new();

/// Set TEST_LOG to see the application logs while running the tests.
fn init_tracing() {
    TRACING.call_once(|| {
        let name = String::from("test");
        let env_filter = String::from("debug");

        if std::env::var("TEST_LOG").is_ok() {
            init_subscriber(get_subscriber(name, env_filter, std::io::stdout));
        } else {
            init_subscriber(get_subscriber(name, env_filter, std::io::sink));
        }
    });
}

/// Friday, May 1st 2015, noon in Los Angeles.
pub fn start_of_test() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2015-05-01T19:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

pub fn phone_number(number: &str) -> PhoneNumber {
    PhoneNumber::parse(number.to_string()).unwrap()
}

pub struct TestApp {
    pub config: Settings,
    pub address: String,
    pub store: Arc<InMemorySubscriberStore>,
    pub clock: Arc<FixedClock>,
    pub dependencies: Dependencies,
    pub twilio_server: MockServer,
}

impl TestApp {
    pub async fn spawn_app() -> TestApp {
        init_tracing();

        let mut config = get_configuration().expect("Missing configuration file.");
        let twilio_server = MockServer::start().await;

        // We are using port 0 as way to define a different port per each test. Port 0 is a special case that operating systems
        // take into account: when port is 0, the OS will search for the first available port
        config.set_app_port(0);
        config.set_twilio_base_url(twilio_server.uri());

        let store = Arc::new(InMemorySubscriberStore::new());
        let clock = Arc::new(FixedClock::new(start_of_test()));
        let dependencies = Dependencies {
            store: store.clone(),
            channel: Arc::new(get_twilio_client(&config.twilio).expect("Invalid Twilio settings.")),
            clock: clock.clone(),
        };

        let application = Application::build(config.clone(), dependencies.clone())
            .await
            .expect("Failed to build application.");

        let address = format!("http://127.0.0.1:{}", application.get_port());

        tokio::spawn(application.run_until_stop());

        TestApp {
            config,
            address,
            store,
            clock,
            dependencies,
            twilio_server,
        }
    }

    pub fn clock_now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn scheduler(&self) -> DeliveryScheduler {
        DeliveryScheduler::new(&self.dependencies, &self.config.delivery)
            .expect("Invalid delivery settings.")
    }

    pub fn messages_path(&self) -> String {
        format!(
            "/2010-04-01/Accounts/{}/Messages.json",
            self.config.twilio.account_sid
        )
    }

    /// A Twilio endpoint accepting every message.
    pub fn twilio_accepts(&self) -> Mock {
        Mock::given(path(self.messages_path()))
            .and(method("POST"))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(serde_json::json!({ "sid": "SM0123" })),
            )
    }

    pub async fn post_subscription(&self, body: &serde_json::Value) -> Response {
        self.post_raw_subscription(body.to_string()).await
    }

    pub async fn post_raw_subscription(&self, body: String) -> Response {
        reqwest::Client::new()
            .post(&format!("{}/api/subscribe", self.address))
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn post_incoming_message(&self, from: &str, body: &str) -> Response {
        reqwest::Client::new()
            .post(&format!("{}/api/incoming-message", self.address))
            .form(&[("From", from), ("Body", body), ("AccountSid", "ACtest")])
            .send()
            .await
            .expect("Failed to execute request.")
    }

    /// Subscribes `number` in Los Angeles, swallowing the welcome messages.
    pub async fn create_subscriber(&self, number: &str) {
        let _mock_guard = self
            .twilio_accepts()
            .named("Welcome messages")
            .expect(2)
            .mount_as_scoped(&self.twilio_server)
            .await;

        let response = self
            .post_subscription(&serde_json::json!({
                "number": number,
                "timezone": "America/Los_Angeles"
            }))
            .await;

        assert_eq!(response.status().as_u16(), 200);
    }

    /// Bodies of every message Twilio received so far, still form-encoded.
    pub async fn sent_bodies(&self) -> Vec<String> {
        self.twilio_server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .map(|request| String::from_utf8_lossy(&request.body).to_string())
            .collect()
    }
}

/// A fresh database with migrations applied, for the Postgres store tests.
pub async fn configure_db(db_config: &mut DatabaseSettings) -> PostgresSubscriberStore {
    let db_test_name = format!("db_{}", Uuid::new_v4().to_string().replace('-', "_"));
    let mut maintenance_config = db_config.clone();
    maintenance_config.set_name(String::from("postgres"));

    // Create database
    let mut connection = PgConnection::connect_with(&maintenance_config.get_db_options())
        .await
        .expect("Failed to connect to Postgres.");

    connection
        .execute(&*format!(r#"CREATE DATABASE "{}";"#, db_test_name))
        .await
        .expect("Failed to create database.");

    connection
        .close()
        .await
        .expect("Failed to close connection.");

    // Execute migrations
    db_config.set_name(db_test_name);

    let db_pool: PgPool = get_connection_db_pool(db_config);
    let store = PostgresSubscriberStore::new(db_pool);

    store.migrate().await.expect("Failed to run migrations.");

    println!("Database {} created!!", db_config.get_name());

    store
}
