use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fixedpoint::{Pips, PriceMicros};

/// A completed (or trailing-unclosed) OHLC candle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OhlcBar {
    pub time: DateTime<Utc>,
    pub open: PriceMicros,
    pub high: PriceMicros,
    pub low: PriceMicros,
    pub close: PriceMicros,
    pub volume: i64,
    pub spread: Pips,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BarError {
    HighBelowOpenOrClose,
    LowAboveOpenOrClose,
    LowAboveHigh,
}

impl std::fmt::Display for BarError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            BarError::HighBelowOpenOrClose => "high must be >= open and >= close",
            BarError::LowAboveOpenOrClose => "low must be <= open and <= close",
            BarError::LowAboveHigh => "low must be <= high",
        };
        write!(f, "bar invariant violated: {msg}")
    }
}

impl std::error::Error for BarError {}

impl OhlcBar {
    pub fn new(
        time: DateTime<Utc>,
        open: PriceMicros,
        high: PriceMicros,
        low: PriceMicros,
        close: PriceMicros,
        volume: i64,
        spread: Pips,
    ) -> Result<Self, BarError> {
        if high < open || high < close {
            return Err(BarError::HighBelowOpenOrClose);
        }
        if low > open || low > close {
            return Err(BarError::LowAboveOpenOrClose);
        }
        if low > high {
            return Err(BarError::LowAboveHigh);
        }
        Ok(Self {
            time,
            open,
            high,
            low,
            close,
            volume,
            spread,
        })
    }
}

/// A fixed-capacity, oldest-evicted window of bars for one timeframe.
#[derive(Clone, Debug, PartialEq)]
pub struct RingBuffer<T> {
    capacity: usize,
    items: Vec<T>,
}

impl<T> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "RingBuffer capacity must be > 0");
        Self {
            capacity,
            items: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> {
        self.items.iter()
    }

    pub fn last(&self) -> Option<&T> {
        self.items.last()
    }

    /// Last `n` items, oldest first. Fewer than `n` if the window isn't full yet.
    pub fn last_n(&self, n: usize) -> &[T] {
        let start = self.items.len().saturating_sub(n);
        &self.items[start..]
    }

    /// Push a new closed bar, evicting the oldest if at capacity.
    pub fn push(&mut self, item: T) {
        if self.items.len() == self.capacity {
            self.items.remove(0);
        }
        self.items.push(item);
    }

    /// Replace the trailing (still-forming) bar in place, or push if empty.
    pub fn replace_last(&mut self, item: T) {
        if let Some(last) = self.items.last_mut() {
            *last = item;
        } else {
            self.items.push(item);
        }
    }
}
