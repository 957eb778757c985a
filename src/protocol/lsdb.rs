use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use super::messages::Lsa;
use crate::types::RouterId;

/// How a received LSA relates to the copy held in the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Newer,
    Same,
    Older,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    /// The LSA replaced an older copy or was the first for its originator.
    Installed,
    /// Same instance as the stored copy.
    Duplicate,
    /// Older than the stored copy.
    Stale,
    /// Arrived already at MaxAge.
    Expired,
}

#[derive(Debug, Clone)]
pub struct LsaEntry {
    lsa: Lsa,
    installed_at: Instant,
}

impl LsaEntry {
    pub fn lsa(&self) -> &Lsa {
        &self.lsa
    }

    /// Current age in seconds, capped at `max_age`.
    pub fn age(&self, now: Instant, max_age: Duration) -> u32 {
        let elapsed = now.saturating_duration_since(self.installed_at).as_secs();
        let age = u64::from(self.lsa.age).saturating_add(elapsed);
        age.min(max_age.as_secs()).try_into().unwrap_or(u32::MAX)
    }
}

/// Summary line of an entry, for status dumps.
#[derive(Debug, Clone, Serialize)]
pub struct LsdbSummary {
    pub originator: RouterId,
    pub sequence: u64,
    pub age: u32,
    pub adjacencies: usize,
}

/// The link-state database: latest LSA per originator.
#[derive(Debug, Clone)]
pub struct Lsdb {
    entries: BTreeMap<RouterId, LsaEntry>,
    max_age: Duration,
    max_age_diff: Duration,
}

impl Lsdb {
    pub fn new(max_age: Duration, max_age_diff: Duration) -> Self {
        Self {
            entries: BTreeMap::new(),
            max_age,
            max_age_diff,
        }
    }

    pub fn get(&self, originator: &RouterId) -> Option<&LsaEntry> {
        self.entries.get(originator)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RouterId, &LsaEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Higher sequence wins; on equal sequence the copy whose age is lower
    /// by more than `max_age_diff` wins, otherwise both are the same
    /// instance.
    pub fn compare(&self, lsa: &Lsa, now: Instant) -> Freshness {
        let Some(current) = self.entries.get(&lsa.originator) else {
            return Freshness::Newer;
        };

        match lsa.sequence.cmp(&current.lsa.sequence) {
            Ordering::Greater => Freshness::Newer,
            Ordering::Less => Freshness::Older,
            Ordering::Equal => {
                let stored_age = u64::from(current.age(now, self.max_age));
                let received_age = u64::from(lsa.age);
                let diff = self.max_age_diff.as_secs();

                if received_age.saturating_add(diff) < stored_age {
                    Freshness::Newer
                } else if received_age > stored_age.saturating_add(diff) {
                    Freshness::Older
                } else {
                    Freshness::Same
                }
            }
        }
    }

    /// Installs `lsa` if it is fresher than the stored copy.
    pub fn install(&mut self, lsa: Lsa, now: Instant) -> InstallOutcome {
        if u64::from(lsa.age) >= self.max_age.as_secs() {
            return InstallOutcome::Expired;
        }

        match self.compare(&lsa, now) {
            Freshness::Newer => {
                self.entries.insert(
                    lsa.originator.clone(),
                    LsaEntry {
                        lsa,
                        installed_at: now,
                    },
                );
                InstallOutcome::Installed
            }
            Freshness::Same => InstallOutcome::Duplicate,
            Freshness::Older => InstallOutcome::Stale,
        }
    }

    /// Removes every entry that reached MaxAge and returns their
    /// originators.
    pub fn remove_expired(&mut self, now: Instant) -> Vec<RouterId> {
        let max_age = self.max_age;
        let expired: Vec<RouterId> = self
            .entries
            .iter()
            .filter(|(_, entry)| u64::from(entry.age(now, max_age)) >= max_age.as_secs())
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            self.entries.remove(id);
        }
        expired
    }

    /// Copy of `originator`'s LSA with its age brought up to date, ready
    /// to be retransmitted.
    pub fn aged_copy(&self, originator: &RouterId, now: Instant) -> Option<Lsa> {
        self.entries.get(originator).map(|entry| {
            let mut lsa = entry.lsa.clone();
            lsa.age = entry.age(now, self.max_age);
            lsa
        })
    }

    /// Every stored LSA with current ages, in originator order.
    pub fn aged_copies(&self, now: Instant) -> Vec<Lsa> {
        self.entries
            .keys()
            .filter_map(|id| self.aged_copy(id, now))
            .collect()
    }

    pub fn summary(&self, now: Instant) -> Vec<LsdbSummary> {
        self.entries
            .values()
            .map(|entry| LsdbSummary {
                originator: entry.lsa.originator.clone(),
                sequence: entry.lsa.sequence,
                age: entry.age(now, self.max_age),
                adjacencies: entry.lsa.adjacencies.len(),
            })
            .collect()
    }
}
