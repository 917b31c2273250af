// Durable named alarms stored as local-scope records

use crate::filter::Filter;
use crate::record::{IndexValue, Record};
use crate::store::Store;
use eyre::{Result, eyre};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};
use uuid::Uuid;

const MS_PER_MINUTE: i64 = 60_000;

/// One pending fire of a named alarm
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alarm {
    pub name: String,
    /// Fresh for every arming, so a stale delivery can be told apart from a re-arm
    pub token: String,
    /// Epoch milliseconds
    pub fire_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_minutes: Option<u32>,
}

impl Alarm {
    fn new(name: &str, fire_at: i64, period_minutes: Option<u32>) -> Self {
        Self {
            name: name.to_string(),
            token: Uuid::now_v7().to_string(),
            fire_at,
            period_minutes,
        }
    }

    pub fn is_periodic(&self) -> bool {
        self.period_minutes.is_some()
    }

    /// First period boundary strictly after `now`; missed periods collapse into one
    fn next_fire_after(&self, now: i64) -> Option<i64> {
        let period = i64::from(self.period_minutes?) * MS_PER_MINUTE;
        if self.fire_at > now {
            return Some(self.fire_at);
        }
        let missed = (now - self.fire_at) / period + 1;
        Some(self.fire_at + missed * period)
    }
}

impl Record for Alarm {
    fn id(&self) -> String {
        self.name.clone()
    }

    fn collection_name() -> &'static str {
        "alarms"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("fire_at".to_string(), IndexValue::Int(self.fire_at));
        fields
    }
}

/// Scheduler of single-fire and periodic named alarms
///
/// Arming a name replaces whatever was pending under it, so there is never more
/// than one pending fire per name. Nothing fires by itself: the background loop
/// asks for [`DurableClock::due`] alarms, runs their handlers and then
/// acknowledges them. Delivery is at-least-once and handlers must be idempotent.
pub trait DurableClock {
    /// Fire `name` once, `delay_minutes` after `now`
    fn arm(&mut self, name: &str, delay_minutes: u32, now: i64) -> Result<Alarm> {
        self.arm_at(name, now + i64::from(delay_minutes) * MS_PER_MINUTE)
    }

    /// Fire `name` once at an absolute instant
    fn arm_at(&mut self, name: &str, fire_at: i64) -> Result<Alarm>;

    /// Fire `name` every `period_minutes`, first one period after `now`
    fn arm_periodic(&mut self, name: &str, period_minutes: u32, now: i64) -> Result<Alarm>;

    /// Drop the pending fire of `name`. Returns false if nothing was pending.
    fn cancel(&mut self, name: &str) -> Result<bool>;

    fn pending(&self, name: &str) -> Result<Option<Alarm>>;

    /// Alarms whose fire time has come, earliest first
    fn due(&self, now: i64) -> Result<Vec<Alarm>>;

    /// Mark a delivered alarm as handled.
    ///
    /// A one-shot alarm is retired and a periodic one moves to its next
    /// boundary, but only if `alarm` is still the armed instance of its name.
    /// Returns false when it was re-armed or cancelled in the meantime.
    fn acknowledge(&mut self, alarm: &Alarm, now: i64) -> Result<bool>;
}

/// [`DurableClock`] backed by the record store
pub struct StoreClock {
    store: Store,
}

impl StoreClock {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut store = Store::open(path)?;
        store.refresh::<Alarm>()?;
        Ok(Self { store })
    }

    /// Every pending alarm, ordered by name
    pub fn list(&self) -> Result<Vec<Alarm>> {
        self.store.list::<Alarm>(&[])
    }

    fn install(&mut self, alarm: Alarm) -> Result<Alarm> {
        self.store.put(&alarm)?;
        debug!(name = %alarm.name, fire_at = alarm.fire_at, period = ?alarm.period_minutes, "Armed alarm");
        Ok(alarm)
    }
}

impl DurableClock for StoreClock {
    fn arm_at(&mut self, name: &str, fire_at: i64) -> Result<Alarm> {
        self.install(Alarm::new(name, fire_at, None))
    }

    fn arm_periodic(&mut self, name: &str, period_minutes: u32, now: i64) -> Result<Alarm> {
        if period_minutes == 0 {
            return Err(eyre!("Alarm period must be at least one minute: {}", name));
        }
        let fire_at = now + i64::from(period_minutes) * MS_PER_MINUTE;
        self.install(Alarm::new(name, fire_at, Some(period_minutes)))
    }

    fn cancel(&mut self, name: &str) -> Result<bool> {
        let cancelled = self.store.delete::<Alarm>(name)?;
        if cancelled {
            debug!(name, "Cancelled alarm");
        }
        Ok(cancelled)
    }

    fn pending(&self, name: &str) -> Result<Option<Alarm>> {
        self.store.get::<Alarm>(name)
    }

    fn due(&self, now: i64) -> Result<Vec<Alarm>> {
        let mut due = self
            .store
            .list::<Alarm>(&[Filter::lte("fire_at", IndexValue::Int(now))])?;
        due.sort_by_key(|alarm| alarm.fire_at);
        Ok(due)
    }

    fn acknowledge(&mut self, alarm: &Alarm, now: i64) -> Result<bool> {
        self.store.transaction(Alarm::scope(), |txn| {
            let current = match txn.get::<Alarm>(&alarm.name)? {
                Some(current) if current.token == alarm.token => current,
                _ => {
                    debug!(name = %alarm.name, "Alarm was re-armed or cancelled before acknowledgement");
                    return Ok(false);
                }
            };

            match current.next_fire_after(now) {
                Some(fire_at) => {
                    let next = Alarm::new(&current.name, fire_at, current.period_minutes);
                    txn.put(&next)?;
                    debug!(name = %next.name, fire_at, "Rescheduled periodic alarm");
                }
                None => {
                    txn.delete::<Alarm>(&current.name)?;
                    info!(name = %current.name, late_ms = now - current.fire_at, "Retired alarm");
                }
            }
            Ok(true)
        })
    }
}
