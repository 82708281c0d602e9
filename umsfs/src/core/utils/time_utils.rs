// SPDX-License-Identifier: MIT

//! Time utilities for filesystem timestamps.
//!
//! - In `std` mode, uses system clock.
//! - In `no_std`, returns UNIX_EPOCH as fixed timestamp.

use time::OffsetDateTime;

/// Returns the current UTC time.
pub fn now_utc() -> OffsetDateTime {
    #[cfg(feature = "std")]
    {
        OffsetDateTime::now_utc()
    }

    #[cfg(not(feature = "std"))]
    {
        OffsetDateTime::UNIX_EPOCH
    }
}
