use chrono_tz::Tz;
use serde::Deserialize;

use crate::clock::time_zone_or_default;
use crate::domain::phone_number::PhoneNumber;

#[derive(Debug)]
pub struct NewSubscriber {
    pub number: PhoneNumber,
    pub timezone: Tz,
}

#[derive(Deserialize, Debug)]
pub struct NewSubscriberBody {
    pub number: String,
    #[serde(default)]
    pub timezone: Option<String>,
}

impl NewSubscriber {
    pub fn parse(body: NewSubscriberBody, default_timezone: Tz) -> Result<Self, String> {
        let number = PhoneNumber::parse(body.number)?;
        let timezone = time_zone_or_default(body.timezone.as_deref(), default_timezone);

        Ok(NewSubscriber { number, timezone })
    }
}
