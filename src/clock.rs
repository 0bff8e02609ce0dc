use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::sync::atomic::{AtomicI64, Ordering};

/// Local wall-clock hour at which subscribers become due.
pub const DELIVERY_HOUR: u32 = 8;

// How far past a DST gap we look for the first valid local instant.
const GAP_PROBE_STEP_MINUTES: i64 = 15;
const GAP_PROBE_STEPS: usize = 16;

/// Source of "now". Injected wherever the current time matters so tests can
/// pin it.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to. Whole-second resolution, matching
/// what the store persists.
pub struct FixedClock {
    epoch_seconds: AtomicI64,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            epoch_seconds: AtomicI64::new(now.timestamp()),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        self.epoch_seconds.store(now.timestamp(), Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.epoch_seconds
            .fetch_add(by.num_seconds(), Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        from_epoch_seconds(self.epoch_seconds.load(Ordering::SeqCst))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

pub fn from_epoch_seconds(seconds: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(seconds, 0).single()
}

pub fn parse_time_zone(name: &str) -> Result<Tz, String> {
    name.parse::<Tz>()
        .map_err(|_| format!("{} is not a valid time zone", name))
}

/// Resolves the zone a subscriber asked for, falling back to `default` when
/// it is missing or unknown.
pub fn time_zone_or_default(name: Option<&str>, default: Tz) -> Tz {
    match name.map(str::trim).filter(|name| !name.is_empty()) {
        None => default,
        Some(name) => parse_time_zone(name).unwrap_or_else(|err| {
            tracing::info!(
                requested_timezone = %name,
                default_timezone = %default.name(),
                "{}, using the default time zone",
                err
            );
            default
        }),
    }
}

/// The instant a subscriber next becomes due: `DELIVERY_HOUR` local time on
/// the calendar day after `reference`'s local date in `tz`.
pub fn next_deadline(reference: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
    let local_date = reference.with_timezone(&tz).date_naive();
    let next_date = local_date.succ_opt().unwrap_or(local_date);

    at_delivery_hour(next_date, tz)
}

/// Full English weekday name of `instant` as seen in `tz`.
pub fn day_of_week_label(instant: DateTime<Utc>, tz: Tz) -> String {
    instant.with_timezone(&tz).format("%A").to_string()
}

fn at_delivery_hour(date: NaiveDate, tz: Tz) -> DateTime<Utc> {
    let mut wall_clock: NaiveDateTime = date
        .and_hms_opt(DELIVERY_HOUR, 0, 0)
        .unwrap_or_else(|| date.and_time(Default::default()));

    for _ in 0..GAP_PROBE_STEPS {
        match tz.from_local_datetime(&wall_clock) {
            LocalResult::Single(instant) => return instant.with_timezone(&Utc),
            LocalResult::Ambiguous(earliest, _) => return earliest.with_timezone(&Utc),
            LocalResult::None => wall_clock += Duration::minutes(GAP_PROBE_STEP_MINUTES),
        }
    }

    Utc.from_utc_datetime(&wall_clock)
}
