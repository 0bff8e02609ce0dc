use crate::clock::{day_of_week_label, next_deadline, Clock};
use crate::domain::new_subscriber::NewSubscriber;
use crate::domain::subscriber::Subscriber;
use crate::sms_client::OutboundChannel;
use crate::storage::{StoreError, SubscriberStore};

pub const WELCOME_MESSAGE: &str =
    "Yo! Okay, every morning I'll text you what day it is. Just say STOP to make me stop.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    Created,
    /// The number was already known; it is sendable again.
    Resubscribed,
}

#[derive(thiserror::Error)]
pub enum SubscribeError {
    #[error("Failed to save the new subscriber.")]
    CreateError(#[source] StoreError),
    #[error("Failed to re-enable an existing subscriber.")]
    ResubscribeError(#[source] StoreError),
}

impl std::fmt::Debug for SubscribeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubscribeError::CreateError(err) | SubscribeError::ResubscribeError(err) => {
                write!(f, "{}\nCaused by:\n\t{:?}", self, err)
            }
        }
    }
}

#[tracing::instrument(
    name = "Subscribing a phone number",
    skip(store, channel, clock, new_subscriber),
    fields(
        number = %new_subscriber.number,
        timezone = %new_subscriber.timezone.name()
    )
)]
pub async fn subscribe(
    store: &dyn SubscriberStore,
    channel: &dyn OutboundChannel,
    clock: &dyn Clock,
    new_subscriber: NewSubscriber,
) -> Result<(Subscriber, SubscribeOutcome), SubscribeError> {
    let now = clock.now();
    let mut subscriber = Subscriber::new(new_subscriber.number, new_subscriber.timezone, now);
    // Today's weekday goes out with the welcome, so the record is never due
    // today, even before `update_sent` runs.
    subscriber.send_deadline = next_deadline(now, new_subscriber.timezone);

    match store.create(&subscriber).await {
        Ok(()) => {}
        Err(StoreError::AlreadyExists) => {
            tracing::info!("Phone number already subscribed");
            return resubscribe(store, subscriber).await;
        }
        Err(err) => return Err(SubscribeError::CreateError(err)),
    }

    let today = format!(
        "Today is {} by the way.",
        day_of_week_label(now, new_subscriber.timezone)
    );
    for body in [WELCOME_MESSAGE, today.as_str()] {
        if let Err(err) = channel.send(&subscriber.number, body).await {
            tracing::warn!("Failed to send welcome message: {:?}", err);
        }
    }

    if let Err(err) = store.update_sent(&subscriber.number, now).await {
        tracing::error!("Failed to record welcome delivery: {:?}", err);
    }

    Ok((subscriber, SubscribeOutcome::Created))
}

async fn resubscribe(
    store: &dyn SubscriberStore,
    requested: Subscriber,
) -> Result<(Subscriber, SubscribeOutcome), SubscribeError> {
    store
        .set_sendable(&requested.number, true)
        .await
        .map_err(SubscribeError::ResubscribeError)?;

    let stored = store
        .get(&requested.number)
        .await
        .map_err(SubscribeError::ResubscribeError)?;

    Ok((stored, SubscribeOutcome::Resubscribed))
}
