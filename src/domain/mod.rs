pub mod new_subscriber;
pub mod phone_number;
pub mod subscriber;
