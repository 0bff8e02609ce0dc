use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::clock::parse_time_zone;
use crate::domain::phone_number::PhoneNumber;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Subscriber {
    pub number: PhoneNumber,
    /// IANA zone name as stored. Validated on subscribe, re-checked on use.
    pub timezone: String,
    pub is_sendable: bool,
    pub last_sent_at: Option<DateTime<Utc>>,
    pub send_deadline: DateTime<Utc>,
}

impl Subscriber {
    /// A fresh, sendable subscription that is due straight away.
    pub fn new(number: PhoneNumber, timezone: Tz, now: DateTime<Utc>) -> Self {
        Self {
            number,
            timezone: timezone.name().to_string(),
            is_sendable: true,
            last_sent_at: None,
            send_deadline: now,
        }
    }

    pub fn time_zone(&self) -> Result<Tz, String> {
        parse_time_zone(&self.timezone)
    }
}
