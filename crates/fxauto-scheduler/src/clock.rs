use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Utc, Weekday};

/// Broker-local wall-clock projection of a UTC instant, per spec §9's
/// fixed resolution: HH:MM-typed fields are broker-local, Instants are UTC.
/// Modelled as a trait rather than a hardcoded timezone so the concrete
/// offset (or a full tz database, if an embedder needs DST) stays outside
/// this crate — decision recorded in DESIGN.md.
pub trait BrokerLocalClock: Send + Sync {
    fn local_time(&self, at: DateTime<Utc>) -> NaiveTime;
    fn local_date(&self, at: DateTime<Utc>) -> NaiveDate;
    fn local_weekday(&self, at: DateTime<Utc>) -> Weekday {
        self.local_date(at).weekday()
    }
}

/// A broker whose local time is a fixed UTC offset (no DST transitions).
/// Good enough for a single-symbol engine talking to one broker terminal;
/// `offset_hours` is read from deployment config / an env var by the embedder.
#[derive(Copy, Clone, Debug)]
pub struct FixedOffsetBrokerClock {
    offset: FixedOffset,
}

impl FixedOffsetBrokerClock {
    pub fn new(offset_hours: i32) -> Self {
        Self {
            offset: FixedOffset::east_opt(offset_hours * 3600).expect("offset_hours in range"),
        }
    }

    pub fn utc() -> Self {
        Self::new(0)
    }
}

impl BrokerLocalClock for FixedOffsetBrokerClock {
    fn local_time(&self, at: DateTime<Utc>) -> NaiveTime {
        at.with_timezone(&self.offset).time()
    }

    fn local_date(&self, at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.offset).date_naive()
    }
}

/// Drives engine time. Two modes per spec §4.1: `Real` reads the OS
/// monotonic/wall clock; `Simulated` is advanced explicitly by the highest
/// tick timestamp consumed so far, for backtests and deterministic tests.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Default)]
pub struct RealClock;

impl Clock for RealClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Simulated clock: `now()` never moves ahead of the last `advance_to` call.
/// Feeding an earlier timestamp is a no-op — time in simulation mode only
/// ever moves forward, mirroring the real clock's monotonicity.
pub struct SimulatedClock {
    current: DateTime<Utc>,
}

impl SimulatedClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { current: start }
    }

    pub fn advance_to(&mut self, at: DateTime<Utc>) {
        if at > self.current {
            self.current = at;
        }
    }
}

impl Clock for SimulatedClock {
    fn now(&self) -> DateTime<Utc> {
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_offset_projects_broker_local_time() {
        let clock = FixedOffsetBrokerClock::new(9); // JST
        let at = DateTime::parse_from_rfc3339("2026-07-30T15:30:00Z").unwrap().with_timezone(&Utc);
        assert_eq!(clock.local_time(at), NaiveTime::from_hms_opt(0, 30, 0).unwrap());
    }

    #[test]
    fn simulated_clock_never_moves_backward() {
        let t0 = Utc::now();
        let mut clock = SimulatedClock::new(t0);
        clock.advance_to(t0 - chrono::Duration::seconds(5));
        assert_eq!(clock.now(), t0);
        clock.advance_to(t0 + chrono::Duration::seconds(5));
        assert_eq!(clock.now(), t0 + chrono::Duration::seconds(5));
    }
}
