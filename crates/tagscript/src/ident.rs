use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

const SECONDS_PER_DAY: u64 = 86_400;

/// Generates identifiers of the form `SSSSS-NNNNNNNN`.
///
/// The prefix is the current time of day in seconds (UTC), the suffix a
/// counter that starts at zero and increases with every call, so ids stay
/// distinct even when many are minted within the same second.
#[derive(Debug)]
pub struct IdGenerator {
    next: AtomicU64,
    clock: fn() -> u64,
}

impl IdGenerator {
    /// Create a generator reading the system clock.
    pub fn new() -> Self {
        Self::with_clock(unix_seconds)
    }

    /// Create a generator reading seconds from `clock`.
    pub fn with_clock(clock: fn() -> u64) -> Self {
        Self {
            next: AtomicU64::new(0),
            clock,
        }
    }

    /// Mint the next identifier.
    pub fn next_id(&self) -> String {
        let seq = self.next.fetch_add(1, Ordering::Relaxed);
        format!("{:05}-{:08}", (self.clock)() % SECONDS_PER_DAY, seq)
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn formats_time_of_day_and_counter() {
        let ids = IdGenerator::with_clock(|| 86_400 * 3 + 43_201);
        assert_eq!(ids.next_id(), "43201-00000000");
        assert_eq!(ids.next_id(), "43201-00000001");
    }

    #[test]
    fn ids_are_unique_within_one_second() {
        let ids = IdGenerator::with_clock(|| 7);
        let minted: Vec<String> = (0..1000).map(|_| ids.next_id()).collect();
        let distinct: HashSet<&String> = minted.iter().collect();
        assert_eq!(distinct.len(), minted.len());

        let suffixes: Vec<u64> = minted
            .iter()
            .map(|id| id.split_once('-').unwrap().1.parse().unwrap())
            .collect();
        assert!(suffixes.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn system_clock_prefix_is_five_digits() {
        let id = IdGenerator::new().next_id();
        let (prefix, suffix) = id.split_once('-').unwrap();
        assert_eq!(prefix.len(), 5);
        assert_eq!(suffix, "00000000");
        assert!(prefix.parse::<u64>().unwrap() < SECONDS_PER_DAY);
    }
}
