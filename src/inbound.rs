use crate::domain::phone_number::PhoneNumber;
use crate::storage::{StoreError, SubscriberStore};

pub const STOP_REPLY: &str = "Okay, I'll stop reminding you starting...NOW!";
pub const UNKNOWN_REPLY: &str = "You do know you're talking to a robot right?";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundCommand {
    Stop,
    Unknown,
}

impl InboundCommand {
    pub fn parse(body: &str) -> Self {
        if body.trim().eq_ignore_ascii_case("stop") {
            InboundCommand::Stop
        } else {
            InboundCommand::Unknown
        }
    }
}

#[derive(thiserror::Error)]
pub enum InboundError {
    #[error("{0}")]
    InvalidSender(String),
    #[error("Failed to find the subscriber who sent the message.")]
    LookupError(#[source] StoreError),
    #[error("Failed to mark the subscriber as not sendable.")]
    UpdateError(#[source] StoreError),
}

impl std::fmt::Debug for InboundError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InboundError::InvalidSender(_) => write!(f, "{}", self),
            InboundError::LookupError(err) | InboundError::UpdateError(err) => {
                write!(f, "{}\nCaused by:\n\t{:?}", self, err)
            }
        }
    }
}

/// Acts on a reply from `from` and returns the text to answer with. Only a
/// stop command changes state; the record is disabled, never deleted.
#[tracing::instrument(name = "Handling an inbound message", skip(store, body))]
pub async fn handle_inbound_message(
    store: &dyn SubscriberStore,
    from: &str,
    body: &str,
) -> Result<&'static str, InboundError> {
    match InboundCommand::parse(body) {
        InboundCommand::Stop => {
            let number =
                PhoneNumber::parse(from.to_string()).map_err(InboundError::InvalidSender)?;
            let subscriber = store.get(&number).await.map_err(InboundError::LookupError)?;

            store
                .set_sendable(&subscriber.number, false)
                .await
                .map_err(InboundError::UpdateError)?;

            tracing::info!("Subscriber unsubscribed");
            Ok(STOP_REPLY)
        }
        InboundCommand::Unknown => {
            tracing::info!("Unknown request from subscriber: `{}`", body);
            Ok(UNKNOWN_REPLY)
        }
    }
}
