//! Local ID Generator
//!
//! Queue items get a device-local identifier before the remote system
//! assigns its own. IDs are time ordered 64-bit snowflakes rendered as
//! `local-<n>`:
//! - 41 bits: milliseconds since the FeeSync epoch
//! - 10 bits: device number (0-1023)
//! - 12 bits: sequence within the millisecond

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Custom epoch: 2024-01-01 00:00:00 UTC
const FEESYNC_EPOCH: u64 = 1704067200000;

const DEVICE_BITS: u64 = 10;
const SEQUENCE_BITS: u64 = 12;

const MAX_DEVICE: u64 = (1 << DEVICE_BITS) - 1;
const MAX_SEQUENCE: u64 = (1 << SEQUENCE_BITS) - 1;

const DEVICE_SHIFT: u64 = SEQUENCE_BITS;
const TIMESTAMP_SHIFT: u64 = DEVICE_BITS + SEQUENCE_BITS;

/// Prefix that marks an id as device-local
pub const LOCAL_PREFIX: &str = "local-";

/// Device-local identifier of a queued record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LocalId(u64);

impl LocalId {
    /// Build an id from its parts. `timestamp_ms` is Unix milliseconds.
    pub fn compose(timestamp_ms: u64, device: u16, sequence: u16) -> Self {
        let timestamp = timestamp_ms.saturating_sub(FEESYNC_EPOCH);
        Self(
            (timestamp << TIMESTAMP_SHIFT)
                | ((device as u64 & MAX_DEVICE) << DEVICE_SHIFT)
                | (sequence as u64 & MAX_SEQUENCE),
        )
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn from_u64(raw: u64) -> Self {
        Self(raw)
    }

    /// Milliseconds since the Unix epoch at which the id was minted
    pub fn timestamp(&self) -> u64 {
        (self.0 >> TIMESTAMP_SHIFT) + FEESYNC_EPOCH
    }

    /// Device number embedded in the id
    pub fn device(&self) -> u16 {
        ((self.0 >> DEVICE_SHIFT) & MAX_DEVICE) as u16
    }

    /// Parse the `local-<n>` form
    pub fn parse(s: &str) -> Option<Self> {
        s.strip_prefix(LOCAL_PREFIX)?.parse::<u64>().ok().map(Self)
    }
}

impl std::fmt::Display for LocalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", LOCAL_PREFIX, self.0)
    }
}

/// Generator of device-local ids
///
/// Lock-free; safe to share between tasks. Ids never go backwards: when
/// the clock steps back, or a millisecond runs out of sequence numbers,
/// the generator keeps counting from its last timestamp instead of
/// waiting for the clock.
pub struct LocalIdGenerator {
    device: u64,
    /// upper bits = last timestamp, lower 12 bits = sequence
    state: AtomicU64,
}

impl LocalIdGenerator {
    /// Create a generator for a device name such as `tablet-3`
    pub fn for_device(device_id: &str) -> Self {
        Self::resume(device_id, None)
    }

    /// Create a generator whose ids all sort after `last`
    pub fn resume(device_id: &str, last: Option<LocalId>) -> Self {
        let state = last
            .map(|id| ((id.0 >> TIMESTAMP_SHIFT) << SEQUENCE_BITS) | (id.0 & MAX_SEQUENCE))
            .unwrap_or(0);
        Self {
            device: Self::device_number(device_id) as u64,
            state: AtomicU64::new(state),
        }
    }

    /// Generate a new id
    pub fn generate(&self) -> LocalId {
        loop {
            let now = Self::current_time_millis();
            let old_state = self.state.load(Ordering::Relaxed);
            let old_timestamp = old_state >> SEQUENCE_BITS;
            let old_sequence = old_state & MAX_SEQUENCE;

            let (timestamp, sequence) = if now > old_timestamp {
                (now, 0)
            } else if old_sequence < MAX_SEQUENCE {
                (old_timestamp, old_sequence + 1)
            } else {
                (old_timestamp + 1, 0)
            };

            let new_state = (timestamp << SEQUENCE_BITS) | sequence;
            if self
                .state
                .compare_exchange(old_state, new_state, Ordering::SeqCst, Ordering::Relaxed)
                .is_ok()
            {
                return LocalId(
                    (timestamp << TIMESTAMP_SHIFT) | (self.device << DEVICE_SHIFT) | sequence,
                );
            }
        }
    }

    fn current_time_millis() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(FEESYNC_EPOCH)
            .saturating_sub(FEESYNC_EPOCH)
    }

    /// Map a device name to 0-1023: trailing digits when present, a hash otherwise
    pub fn device_number(device_id: &str) -> u16 {
        let digits: String = device_id
            .chars()
            .rev()
            .take_while(|c| c.is_ascii_digit())
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();

        match digits.parse::<u64>() {
            Ok(n) => (n % (MAX_DEVICE + 1)) as u16,
            Err(_) => {
                let hash = device_id
                    .bytes()
                    .fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64));
                (hash % (MAX_DEVICE + 1)) as u16
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_ids_unique_and_ordered() {
        let gen = LocalIdGenerator::for_device("tablet-1");
        let mut seen = HashSet::new();
        let mut last = None;

        for _ in 0..5000 {
            let id = gen.generate();
            assert!(seen.insert(id), "duplicate id {}", id);
            if let Some(prev) = last {
                assert!(id > prev);
            }
            last = Some(id);
        }
    }

    #[test]
    fn test_clock_behind_last_id_does_not_block() {
        let ahead = LocalIdGenerator::current_time_millis() + FEESYNC_EPOCH + 3_600_000;
        let last = LocalId::compose(ahead, 7, 4000);
        let gen = LocalIdGenerator::resume("tablet-7", Some(last));

        let mut prev = last;
        for _ in 0..10_000 {
            let id = gen.generate();
            assert!(id > prev);
            prev = id;
        }
        assert!(prev.timestamp() >= ahead);
    }

    #[test]
    fn test_display_and_parse() {
        let gen = LocalIdGenerator::for_device("tablet-42");
        let id = gen.generate();
        let text = id.to_string();

        assert!(text.starts_with("local-"));
        assert_eq!(LocalId::parse(&text), Some(id));
        assert_eq!(id.device(), 42);
        assert!(id.timestamp() > FEESYNC_EPOCH);
        assert_eq!(LocalId::parse("stu-9"), None);
    }

    #[test]
    fn test_device_number() {
        assert_eq!(LocalIdGenerator::device_number("tablet-5"), 5);
        assert_eq!(LocalIdGenerator::device_number("front-desk-1030"), 6);
        assert_ne!(
            LocalIdGenerator::device_number("office"),
            LocalIdGenerator::device_number("library")
        );
    }
}
