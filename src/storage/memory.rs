use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;

use super::{advance_deadline, StoreError, SubscriberStore};
use crate::domain::phone_number::PhoneNumber;
use crate::domain::subscriber::Subscriber;

/// Process-local store. Same semantics as the Postgres backend, nothing
/// survives a restart.
#[derive(Default)]
pub struct InMemorySubscriberStore {
    subscribers: Mutex<HashMap<PhoneNumber, Subscriber>>,
}

impl InMemorySubscriberStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.subscribers.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.subscribers.lock().await.is_empty()
    }
}

#[async_trait]
impl SubscriberStore for InMemorySubscriberStore {
    #[tracing::instrument(
        name = "Creating subscriber in memory",
        skip(self, subscriber),
        fields(number = %subscriber.number)
    )]
    async fn create(&self, subscriber: &Subscriber) -> Result<(), StoreError> {
        let mut subscribers = self.subscribers.lock().await;

        if subscribers.contains_key(&subscriber.number) {
            return Err(StoreError::AlreadyExists);
        }

        subscribers.insert(subscriber.number.clone(), subscriber.clone());

        Ok(())
    }

    async fn get(&self, number: &PhoneNumber) -> Result<Subscriber, StoreError> {
        self.subscribers
            .lock()
            .await
            .get(number)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn get_due_before(
        &self,
        deadline: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Subscriber>, StoreError> {
        let limit = usize::try_from(limit).unwrap_or(0);

        Ok(self
            .subscribers
            .lock()
            .await
            .values()
            .filter(|subscriber| subscriber.send_deadline < deadline)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn update_sent(
        &self,
        number: &PhoneNumber,
        sent_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut subscribers = self.subscribers.lock().await;
        let subscriber = subscribers.get_mut(number).ok_or(StoreError::NotFound)?;
        let deadline = advance_deadline(&subscriber.timezone, sent_at);

        subscriber.last_sent_at = Some(sent_at);
        subscriber.send_deadline = subscriber.send_deadline.max(deadline);

        Ok(())
    }

    async fn update_skipped(
        &self,
        number: &PhoneNumber,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut subscribers = self.subscribers.lock().await;
        let subscriber = subscribers.get_mut(number).ok_or(StoreError::NotFound)?;
        let deadline = advance_deadline(&subscriber.timezone, at);

        subscriber.send_deadline = subscriber.send_deadline.max(deadline);

        Ok(())
    }

    async fn set_sendable(
        &self,
        number: &PhoneNumber,
        is_sendable: bool,
    ) -> Result<(), StoreError> {
        let mut subscribers = self.subscribers.lock().await;
        let subscriber = subscribers.get_mut(number).ok_or(StoreError::NotFound)?;

        subscriber.is_sendable = is_sendable;

        Ok(())
    }
}
