//! Ledger sequence and per-(prefix, period) counters for persisted numbers.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{Datelike, NaiveDate};

use stockledger_core::{DomainError, DomainResult};
use stockledger_inventory::{Movement, MovementNumber};

use crate::locks::poisoned;

#[derive(Debug, Default)]
struct Counters {
    /// Last ledger sequence handed out.
    seq: u64,
    /// Latest `(year, month, counter)` per prefix.
    latest: HashMap<String, (i32, u32, u32)>,
}

impl Counters {
    /// The period never moves backwards for a prefix: a caller holding a date
    /// from before a month rollover gets the newer period.
    fn next_number(&mut self, prefix: &str, period: NaiveDate) -> DomainResult<(i32, u32, u32)> {
        let requested = (period.year(), period.month());
        let slot = self
            .latest
            .entry(prefix.to_string())
            .or_insert((requested.0, requested.1, 0));
        if requested > (slot.0, slot.1) {
            *slot = (requested.0, requested.1, 0);
        }
        slot.2 = slot
            .2
            .checked_add(1)
            .ok_or_else(|| DomainError::persistence(format!("{prefix} counter exhausted")))?;
        Ok(*slot)
    }

    fn next_seq(&mut self) -> DomainResult<u64> {
        self.seq = self
            .seq
            .checked_add(1)
            .ok_or_else(|| DomainError::persistence("ledger sequence exhausted"))?;
        Ok(self.seq)
    }

    fn draw(&mut self, prefix: &str, period: NaiveDate) -> DomainResult<(u64, MovementNumber)> {
        let seq = self.next_seq()?;
        let (year, month, n) = self.next_number(prefix, period)?;
        Ok((seq, MovementNumber::from_parts(prefix, year, month, n)))
    }
}

/// Counters only move forward: a number handed out is never handed out
/// again, even if the caller fails to persist it.
///
/// Ledger sequence and movement number are drawn under one lock, so for a
/// given prefix ledger order and number order agree.
#[derive(Debug, Default)]
pub struct NumberSequence {
    counters: Mutex<Counters>,
}

impl NumberSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue after everything already stored.
    pub fn resume<'a, M>(movements: M) -> DomainResult<Self>
    where
        M: IntoIterator<Item = &'a Movement>,
    {
        let mut counters = Counters::default();
        for m in movements {
            counters.seq = counters.seq.max(m.seq);
            let (prefix, year, month, counter) = m
                .number
                .parts()
                .ok_or_else(|| DomainError::persistence(format!("malformed movement number {}", m.number)))?;
            let stored = (year, month, counter);
            let slot = counters.latest.entry(prefix.to_string()).or_insert(stored);
            if stored > *slot {
                *slot = stored;
            }
        }
        Ok(Self {
            counters: Mutex::new(counters),
        })
    }

    /// Next counter for `prefix` in the month of `period`, starting at 1.
    pub fn next(&self, prefix: &str, period: NaiveDate) -> DomainResult<u32> {
        let mut counters = self.counters.lock().map_err(|_| poisoned("number sequence"))?;
        Ok(counters.next_number(prefix, period)?.2)
    }

    /// `PREFIX-YYYYMM-NNNNN` for workflow documents (transfers, inventories).
    pub fn document_number(&self, prefix: &str, period: NaiveDate) -> DomainResult<String> {
        let mut counters = self.counters.lock().map_err(|_| poisoned("number sequence"))?;
        let (year, month, n) = counters.next_number(prefix, period)?;
        Ok(format!("{prefix}-{year:04}{month:02}-{n:05}"))
    }

    /// One `(seq, number)` pair.
    pub fn next_movement(&self, prefix: &str, period: NaiveDate) -> DomainResult<(u64, MovementNumber)> {
        let mut counters = self.counters.lock().map_err(|_| poisoned("number sequence"))?;
        counters.draw(prefix, period)
    }

    /// `count` consecutive `(seq, number)` pairs for one posting.
    pub fn movements(&self, prefix: &str, period: NaiveDate, count: usize) -> DomainResult<Vec<(u64, MovementNumber)>> {
        let mut counters = self.counters.lock().map_err(|_| poisoned("number sequence"))?;
        (0..count).map(|_| counters.draw(prefix, period)).collect()
    }
}
