use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};

use crate::clock::BrokerLocalClock;

/// Total documented order jobs for the same virtual instant fire in
/// (spec §4.1/§5): Layer-1 before Layer-2 before Layer-3 before daily jobs.
/// Ties within a kind are broken by registration order.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum JobKind {
    Layer1,
    Layer2a,
    Layer2b,
    Layer3a,
    Daily,
}

struct PeriodicJob {
    kind: JobKind,
    name: &'static str,
    period: Duration,
    phase: Duration,
    fire_count: i64,
}

impl PeriodicJob {
    /// Fires at most once per call, even if `now` has drifted past several
    /// periods since the last check — matches "at most once per period per
    /// virtual tick" (spec §4.1). Catch-up beyond one period is the caller's
    /// responsibility (advance frequently enough that this doesn't matter).
    fn due(&mut self, elapsed_since_start: Duration) -> bool {
        let threshold = self.phase + self.period * self.fire_count as i32;
        if elapsed_since_start >= threshold {
            self.fire_count += 1;
            true
        } else {
            false
        }
    }
}

struct DailyJob {
    name: String,
    hhmm: NaiveTime,
    last_fired_date: Option<NaiveDate>,
}

/// A job the scheduler has determined is due at this `advance` call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DueJob {
    pub kind: JobKind,
    pub name: String,
}

/// Drives the periodic (Layer-1/2a/2b/3a) and daily wall-clock jobs per
/// spec §4.1. Holds no business logic — `fxauto-runtime` dispatches on
/// `DueJob::name`/`kind`.
pub struct Scheduler<C: BrokerLocalClock> {
    broker_clock: C,
    start: DateTime<Utc>,
    periodic: Vec<PeriodicJob>,
    daily: Vec<DailyJob>,
}

impl<C: BrokerLocalClock> Scheduler<C> {
    pub fn new(broker_clock: C, start: DateTime<Utc>) -> Self {
        Self {
            broker_clock,
            start,
            periodic: Vec::new(),
            daily: Vec::new(),
        }
    }

    pub fn register_periodic(&mut self, kind: JobKind, name: &'static str, period: Duration, phase: Duration) {
        self.periodic.push(PeriodicJob { kind, name, period, phase, fire_count: 0 });
    }

    pub fn register_daily(&mut self, name: impl Into<String>, hhmm: NaiveTime) {
        self.daily.push(DailyJob { name: name.into(), hhmm, last_fired_date: None });
    }

    /// Jobs due as of `now`, in the documented total order. Daily jobs are
    /// idempotent per broker-local date: once fired for a date, they won't
    /// fire again until the date rolls over.
    pub fn advance(&mut self, now: DateTime<Utc>) -> Vec<DueJob> {
        let elapsed = now.signed_duration_since(self.start).max(Duration::zero());
        let mut due = Vec::new();

        for job in &mut self.periodic {
            if job.due(elapsed) {
                due.push((job.kind, due.len(), DueJob { kind: job.kind, name: job.name.to_string() }));
            }
        }

        let local_date = self.broker_clock.local_date(now);
        let local_time = self.broker_clock.local_time(now);
        for job in &mut self.daily {
            let already_fired = job.last_fired_date == Some(local_date);
            if !already_fired && local_time >= job.hhmm {
                job.last_fired_date = Some(local_date);
                due.push((JobKind::Daily, due.len(), DueJob { kind: JobKind::Daily, name: job.name.clone() }));
            }
        }

        due.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
        due.into_iter().map(|(_, _, job)| job).collect()
    }

    pub fn broker_clock(&self) -> &C {
        &self.broker_clock
    }
}
