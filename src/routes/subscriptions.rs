use actix_web::{web, HttpResponse, Responder};

use crate::{
    clock::Clock,
    domain::new_subscriber::{NewSubscriber, NewSubscriberBody},
    sms_client::OutboundChannel,
    startup::DefaultTimeZone,
    storage::SubscriberStore,
    subscribe::subscribe,
};

#[derive(serde::Serialize, Default, Debug)]
pub struct SubscribeResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub subscribed: bool,
}

impl SubscribeResponse {
    fn failed(error: &str) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Default::default()
        }
    }
}

#[tracing::instrument(
    name = "Creating a new subscriber handler",
    skip(body, store, channel, clock, default_timezone)
)]
pub async fn handle_create_subscription(
    body: web::Bytes,
    store: web::Data<dyn SubscriberStore>,
    channel: web::Data<dyn OutboundChannel>,
    clock: web::Data<dyn Clock>,
    default_timezone: web::Data<DefaultTimeZone>,
) -> impl Responder {
    // Decoded by hand so malformed bodies still get a JSON answer.
    let body: NewSubscriberBody = match serde_json::from_slice(&body) {
        Ok(body) => body,
        Err(err) => {
            tracing::error!("Failed to decode request body: {:?}", err);
            return HttpResponse::BadRequest().json(SubscribeResponse::failed(
                "Failed to read the subscribe request. Did you send it as JSON?",
            ));
        }
    };

    let new_subscriber = match NewSubscriber::parse(body, default_timezone.0) {
        Ok(subscriber) => subscriber,
        Err(err) => {
            tracing::error!("Validation error: {:?}", err);
            return HttpResponse::PreconditionFailed()
                .json(SubscribeResponse::failed("Invalid phone number."));
        }
    };

    match subscribe(
        store.get_ref(),
        channel.get_ref(),
        clock.get_ref(),
        new_subscriber,
    )
    .await
    {
        Ok((subscriber, _)) => HttpResponse::Ok().json(SubscribeResponse {
            number: Some(subscriber.number.to_string()),
            timezone: Some(subscriber.timezone),
            error: None,
            subscribed: true,
        }),
        Err(err) => {
            tracing::error!("Failed to subscribe: {:?}", err);
            HttpResponse::InternalServerError()
                .json(SubscribeResponse::failed("An internal error occured."))
        }
    }
}
