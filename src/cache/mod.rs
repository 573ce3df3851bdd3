//! Read-Through Cache
//!
//! TTL-bounded persistent key/value store for reference data, and the
//! read-through service that fronts the remote backend with it.

mod reference;
mod store;

pub use reference::ReferenceData;
pub use store::{CacheStats, CacheStore};

/// Well-known cache keys
pub mod keys {
    /// Student roster
    pub const STUDENTS: &str = "students";
    /// Grade catalog with flat fees
    pub const GRADES: &str = "grades";
    /// Per-term fee schedule
    pub const TERM_FEES: &str = "term_fees";
    /// Enrollment applications listing
    pub const ENROLLMENTS: &str = "enrollments";
    /// Recorded payments listing
    pub const PAYMENTS: &str = "payments";

    /// Keys the device needs to keep operating offline
    pub const ESSENTIAL: [&str; 3] = [STUDENTS, GRADES, TERM_FEES];

    pub fn is_essential(key: &str) -> bool {
        ESSENTIAL.contains(&key)
    }
}
