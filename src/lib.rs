pub mod clock;
pub mod config;
pub mod domain;
pub mod inbound;
pub mod routes;
pub mod scheduler;
pub mod sms_client;
pub mod startup;
pub mod storage;
pub mod subscribe;
pub mod telemetry;
