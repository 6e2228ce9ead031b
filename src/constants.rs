// SPDX-License-Identifier: GPL-3.0-only

//! Engine-wide constants

use std::time::Duration;

/// Raw image reader depth: how many sensor frames the adapter may hold
/// before the oldest is dropped. Matches the pool's steal-oldest policy so
/// the producer always makes forward progress.
pub const MAX_BUFFERED_RAW_IMAGES: usize = 4;

/// Event-loop poll interval. The loop wakes at least this often to check
/// for the stop sentinel and the HDR deadline.
pub const EVENT_LOOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// HDR capture constants
pub mod hdr {
    use super::Duration;

    /// How long to wait for bracket frames after the hardware reports the
    /// sequence complete before failing the capture.
    pub const SEQUENCE_TIMEOUT: Duration = Duration::from_millis(5000);
}

/// Autofocus / auto-exposure metering region constants
pub mod metering {
    /// Side length of the AF/AE metering rectangle, in sensor pixels
    pub const REGION_SIDE: i32 = 200;

    /// Metering weight applied to the region
    pub const REGION_WEIGHT: i32 = 1000;
}

/// Raw image consumer constants
pub mod consumer {
    /// How many unmatched images or metadata records the matcher holds
    /// before evicting the oldest.
    pub const MAX_PENDING_MATCHES: usize = 8;

    /// Default number of pool buffers allocated at consumer start
    pub const DEFAULT_POOL_BUFFERS: usize = 8;
}
