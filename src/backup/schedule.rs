//! Recurrence model handed to whatever invokes the engine on a cadence.
//!
//! [`ScheduleConfig`] is the `Schedule` section of the configuration. It is
//! turned into a [`RecurringTrigger`], which a [`Scheduler`] adapter registers.
//! The core never schedules itself; [`LoopScheduler`] is the in-process
//! adapter used by the binary's daemon mode.

use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::validate::{validate_time_of_day, TIME_OF_DAY_FORMAT};
use chrono::{DateTime, Duration, Local, NaiveTime, TimeZone, Timelike, Weekday};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use tracing::info;
use validator::Validate;

/// Hourly triggers repeat for roughly ten years rather than forever.
pub static HOURLY_REPEAT_DAYS: i64 = 3650;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Frequency {
    Daily,
    Weekly,
    Hourly,
}

#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize, Validate, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct ScheduleConfig {
    #[serde(default)]
    enabled: bool,
    frequency: Frequency,
    #[validate(custom(function = validate_time_of_day))]
    time: String,
    /// Day for weekly runs, Monday when absent.
    day: Option<Weekday>,
}

impl ScheduleConfig {
    pub fn new<S: Into<String>>(enabled: bool, frequency: Frequency, time: S, day: Option<Weekday>) -> Self {
        Self {
            enabled,
            frequency,
            time: time.into(),
            day,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn trigger<T: TimeZone>(&self, registered_at: &DateTime<T>) -> Result<RecurringTrigger<T>> {
        let time_of_day = NaiveTime::parse_from_str(&self.time, TIME_OF_DAY_FORMAT)
            .map_err(|e| Error::configuration(format!("Invalid schedule time {:?}: {e}", self.time)))?;
        RecurringTrigger::new(
            self.frequency,
            time_of_day,
            self.day.unwrap_or(Weekday::Mon),
            registered_at,
        )
    }
}

#[derive(Clone, Debug)]
pub struct RecurringTrigger<T: TimeZone> {
    frequency: Frequency,
    time_of_day: NaiveTime,
    day: Weekday,
    first_fire: DateTime<T>,
    repeat_until: Option<DateTime<T>>,
}

impl<T: TimeZone> RecurringTrigger<T> {
    pub fn new(
        frequency: Frequency,
        time_of_day: NaiveTime,
        day: Weekday,
        registered_at: &DateTime<T>,
    ) -> Result<Self> {
        let mut trigger = Self {
            frequency,
            time_of_day,
            day,
            first_fire: registered_at.clone(),
            repeat_until: None,
        };
        // Hourly repetition starts at the first occurrence of the time of day.
        let anchor = match frequency {
            Frequency::Hourly => Self::parse_cron(&trigger.daily_cron(), registered_at)?,
            Frequency::Daily | Frequency::Weekly => Self::parse_cron(&trigger.cron(), registered_at)?,
        };
        if frequency == Frequency::Hourly {
            trigger.repeat_until = Some(anchor.clone() + Duration::days(HOURLY_REPEAT_DAYS));
        }
        trigger.first_fire = anchor;
        Ok(trigger)
    }

    pub fn frequency(&self) -> Frequency {
        self.frequency
    }

    pub fn first_fire(&self) -> &DateTime<T> {
        &self.first_fire
    }

    pub fn repeat_until(&self) -> Option<&DateTime<T>> {
        self.repeat_until.as_ref()
    }

    /// Five-field cron expression of the recurrence.
    pub fn cron(&self) -> String {
        let minute = self.time_of_day.minute();
        let hour = self.time_of_day.hour();
        match self.frequency {
            Frequency::Hourly => format!("{minute} * * * *"),
            Frequency::Daily => self.daily_cron(),
            Frequency::Weekly => format!(
                "{minute} {hour} * * {}",
                self.day.num_days_from_sunday()
            ),
        }
    }

    fn daily_cron(&self) -> String {
        format!("{} {} * * *", self.time_of_day.minute(), self.time_of_day.hour())
    }

    /// Next fire time strictly after `after`, `None` once a bounded trigger
    /// has run out.
    pub fn next_after(&self, after: &DateTime<T>) -> Result<Option<DateTime<T>>> {
        if *after < self.first_fire {
            return Ok(Some(self.first_fire.clone()));
        }
        let next = Self::parse_cron(&self.cron(), after)?;
        match &self.repeat_until {
            Some(until) if next > *until => Ok(None),
            _ => Ok(Some(next)),
        }
    }

    fn parse_cron(cron: &str, after: &DateTime<T>) -> Result<DateTime<T>> {
        cron_parser::parse(cron, after)
            .map_err(|e| Error::configuration(format!("Invalid cron string {cron:?}: {e:?}")))
    }
}

/// Platform adapter registering a recurring invocation of `entrypoint`.
pub trait Scheduler {
    fn register_recurring_trigger(
        &self,
        trigger: RecurringTrigger<Local>,
        entrypoint: &mut dyn FnMut(),
    ) -> Result<()>;
}

/// Runs the trigger in the current process, sleeping between fire times.
/// Returns only when a bounded trigger expires.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoopScheduler;

impl Scheduler for LoopScheduler {
    fn register_recurring_trigger(
        &self,
        trigger: RecurringTrigger<Local>,
        entrypoint: &mut dyn FnMut(),
    ) -> Result<()> {
        info!("Registered {:?} trigger ({})", trigger.frequency(), trigger.cron());
        let mut after = Local::now();
        loop {
            let Some(next) = trigger.next_after(&after)? else {
                info!("Trigger expired after {:?}", trigger.repeat_until());
                return Ok(());
            };
            let now = Local::now();
            if now < next {
                info!("Sleeping until {next}");
                std::thread::sleep((next - now).to_std().unwrap_or_default());
            }
            entrypoint();
            after = resume_after(next, Local::now());
        }
    }
}

/// Point to look for the next fire time from once a run is over. Fire times
/// that passed while the run was still going are skipped, not replayed.
fn resume_after<T: TimeZone>(fired_at: DateTime<T>, finished_at: DateTime<T>) -> DateTime<T> {
    std::cmp::max(fired_at, finished_at)
}
