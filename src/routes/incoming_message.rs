use actix_web::http::header::ContentType;
use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse, ResponseError};
use serde::Deserialize;

use crate::inbound::{handle_inbound_message, InboundError};
use crate::sms_client::twiml_message;
use crate::storage::SubscriberStore;

/// Form fields of the provider's inbound message webhook.
#[derive(Deserialize, Debug)]
pub struct IncomingMessage {
    #[serde(rename = "From")]
    pub from: String,
    #[serde(rename = "Body", default)]
    pub body: String,
    #[serde(rename = "AccountSid", default)]
    pub account_sid: String,
}

#[tracing::instrument(
    name = "Processing an inbound message webhook",
    skip(form, store),
    fields(
        from = %form.from,
        account_sid = %form.account_sid
    )
)]
pub async fn handle_incoming_message(
    form: web::Form<IncomingMessage>,
    store: web::Data<dyn SubscriberStore>,
) -> Result<HttpResponse, IncomingMessageError> {
    let reply = handle_inbound_message(store.get_ref(), &form.from, &form.body).await?;

    Ok(HttpResponse::Ok()
        .content_type(ContentType::xml())
        .body(twiml_message(reply)))
}

#[derive(thiserror::Error)]
#[error(transparent)]
pub struct IncomingMessageError(#[from] InboundError);

impl std::fmt::Debug for IncomingMessageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl ResponseError for IncomingMessageError {
    fn status_code(&self) -> StatusCode {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}
