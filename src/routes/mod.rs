mod health_check;
mod incoming_message;
mod subscriptions;

pub use health_check::health_check;
pub use incoming_message::handle_incoming_message;
pub use subscriptions::handle_create_subscription;
