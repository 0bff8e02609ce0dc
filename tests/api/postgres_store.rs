//! These run against a real Postgres (see `config/base.yaml`), so they are
//! ignored by default. Run them with `cargo test -- --ignored`.
use chrono::Duration;
use claims::{assert_err, assert_ok};
use sqlx::{Connection, Executor, PgConnection};
use std::sync::Arc;

use crate::helpers::{configure_db, phone_number, start_of_test, NUMBER};
use what_day_is_it::clock::{next_deadline, FixedClock};
use what_day_is_it::config::get_configuration;
use what_day_is_it::domain::phone_number::PhoneNumber;
use what_day_is_it::domain::subscriber::Subscriber;
use what_day_is_it::scheduler::DeliveryScheduler;
use what_day_is_it::sms_client::{MessageId, OutboundChannel, SendError};
use what_day_is_it::startup::Dependencies;
use what_day_is_it::storage::{PostgresSubscriberStore, StoreError, SubscriberStore};

async fn spawn_store() -> PostgresSubscriberStore {
    let mut config = get_configuration().expect("Missing configuration file.");
    configure_db(&mut config.database).await
}

fn subscriber(number: &str) -> Subscriber {
    Subscriber::new(
        phone_number(number),
        chrono_tz::America::Los_Angeles,
        start_of_test(),
    )
}

#[tokio::test]
#[ignore]
async fn created_subscriber_can_be_read_back() {
    let store = spawn_store().await;

    assert_ok!(store.create(&subscriber(NUMBER)).await);

    let saved = store.get(&phone_number(NUMBER)).await.unwrap();
    assert_eq!(saved, subscriber(NUMBER));
}

#[tokio::test]
#[ignore]
async fn creating_an_existing_number_keeps_the_stored_record() {
    let store = spawn_store().await;
    store.create(&subscriber(NUMBER)).await.unwrap();

    let mut other = subscriber(NUMBER);
    other.timezone = String::from("Asia/Tokyo");
    other.is_sendable = false;

    let result = store.create(&other).await;

    assert!(matches!(result, Err(StoreError::AlreadyExists)));
    assert_eq!(
        store.get(&phone_number(NUMBER)).await.unwrap(),
        subscriber(NUMBER)
    );
}

#[tokio::test]
#[ignore]
async fn unknown_number_is_not_found() {
    let store = spawn_store().await;

    assert!(matches!(
        store.get(&phone_number(NUMBER)).await,
        Err(StoreError::NotFound)
    ));
    assert!(matches!(
        store.set_sendable(&phone_number(NUMBER), false).await,
        Err(StoreError::NotFound)
    ));
    assert!(matches!(
        store
            .update_sent(&phone_number(NUMBER), start_of_test())
            .await,
        Err(StoreError::NotFound)
    ));
}

#[tokio::test]
#[ignore]
async fn due_scan_is_strict_and_bounded() {
    let store = spawn_store().await;
    for number in ["+15554440001", "+15554440002", "+15554440003"] {
        store.create(&subscriber(number)).await.unwrap();
    }

    let at_deadline = store.get_due_before(start_of_test(), 10).await.unwrap();
    let after_deadline = store
        .get_due_before(start_of_test() + Duration::seconds(1), 2)
        .await
        .unwrap();

    assert!(at_deadline.is_empty());
    assert_eq!(after_deadline.len(), 2);
}

#[tokio::test]
#[ignore]
async fn sent_and_skipped_updates_advance_the_deadline() {
    let store = spawn_store().await;
    let number = phone_number(NUMBER);
    store.create(&subscriber(NUMBER)).await.unwrap();

    let later = start_of_test() + Duration::days(1);
    assert_ok!(store.update_skipped(&number, start_of_test()).await);
    let skipped = store.get(&number).await.unwrap();
    assert_eq!(skipped.last_sent_at, None);
    assert_eq!(
        skipped.send_deadline,
        next_deadline(start_of_test(), chrono_tz::America::Los_Angeles)
    );

    assert_ok!(store.update_sent(&number, later).await);
    let sent = store.get(&number).await.unwrap();
    assert_eq!(sent.last_sent_at, Some(later));
    assert_eq!(
        sent.send_deadline,
        next_deadline(later, chrono_tz::America::Los_Angeles)
    );

    // A stale write can't pull the deadline back.
    assert_ok!(store.update_sent(&number, start_of_test()).await);
    assert_eq!(
        store.get(&number).await.unwrap().send_deadline,
        sent.send_deadline
    );
}

#[tokio::test]
#[ignore]
async fn sendable_flag_can_be_toggled() {
    let store = spawn_store().await;
    let number = phone_number(NUMBER);
    store.create(&subscriber(NUMBER)).await.unwrap();

    assert_ok!(store.set_sendable(&number, false).await);
    assert!(!store.get(&number).await.unwrap().is_sendable);

    assert_ok!(store.set_sendable(&number, true).await);
    assert!(store.get(&number).await.unwrap().is_sendable);
}

#[tokio::test]
#[ignore]
async fn corrupt_timezone_is_still_advanced() {
    let store = spawn_store().await;
    let number = phone_number(NUMBER);
    let mut corrupt = subscriber(NUMBER);
    corrupt.timezone = String::from("Not/A_Zone");
    store.create(&corrupt).await.unwrap();

    assert_ok!(store.update_skipped(&number, start_of_test()).await);

    let saved = store.get(&number).await.unwrap();
    assert_eq!(saved.send_deadline, next_deadline(start_of_test(), chrono_tz::UTC));
    assert_err!(saved.time_zone());
}

struct AcceptingChannel;

#[async_trait::async_trait]
impl OutboundChannel for AcceptingChannel {
    async fn send(&self, _: &PhoneNumber, _: &str) -> Result<MessageId, SendError> {
        Ok(MessageId(String::from("SM0123")))
    }
}

#[tokio::test]
#[ignore]
async fn unreadable_rows_do_not_block_healthy_subscribers() {
    let mut config = get_configuration().expect("Missing configuration file.");
    let store = configure_db(&mut config.database).await;

    // More unreadable rows than fit in one batch, all due before anybody else.
    let mut connection = PgConnection::connect_with(&config.database.get_db_options())
        .await
        .expect("Failed to connect to Postgres.");
    for i in 0..(config.delivery.batch_size + 2) {
        connection
            .execute(&*format!(
                r#"INSERT INTO subscribers (number, timezone, is_sendable, send_deadline)
                VALUES ('bogus-{}', 'America/Los_Angeles', true, 0);"#,
                i
            ))
            .await
            .expect("Failed to insert unreadable row.");
    }
    connection.close().await.expect("Failed to close connection.");

    let mut healthy = subscriber(NUMBER);
    healthy.send_deadline = start_of_test() - Duration::hours(1);
    store.create(&healthy).await.unwrap();

    let clock = Arc::new(FixedClock::new(start_of_test()));
    let dependencies = Dependencies {
        store: Arc::new(store.clone()),
        channel: Arc::new(AcceptingChannel),
        clock,
    };
    let scheduler = DeliveryScheduler::new(&dependencies, &config.delivery).unwrap();

    let report = assert_ok!(scheduler.drain().await);

    assert_eq!(report.sent, 1);
    assert_eq!(
        store.get(&phone_number(NUMBER)).await.unwrap().last_sent_at,
        Some(start_of_test())
    );
    assert!(store
        .get_due_before(start_of_test(), 100)
        .await
        .unwrap()
        .is_empty());
}
