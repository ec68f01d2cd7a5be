/*!
 * System Limits and Constants
 *
 * Centralized location for the limits and magic numbers of the IPC layer.
 * Organized by domain for maintainability and discoverability.
 */

use std::ops::RangeInclusive;
use std::time::Duration;

// =============================================================================
// MESSAGE LIMITS
// =============================================================================

/// Largest payload the local kernel accepts in one message (64KB)
/// Larger sends fail in the kernel with E2BIG, not in the layer
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Size of the opaque fixed header carried by every message
pub const MESSAGE_HEADER_SIZE: usize = 16;

// =============================================================================
// CHANNEL AND CONNECTION LIMITS
// =============================================================================

/// Highest channel number `find_connection` probes on a peer
pub const DEFAULT_MAX_CHANNEL_PROBE: i32 = 32;

/// Channels a single process may own
pub const MAX_CHANNELS_PER_PROCESS: usize = 64;

/// First channel number handed out by the kernel
pub const FIRST_CHANNEL_ID: i32 = 1;

/// First connection id handed out by the kernel (0-2 mirror stdio fds)
pub const FIRST_CONNECTION_ID: i32 = 3;

// =============================================================================
// MESSAGE QUEUE LIMITS
// =============================================================================

/// Upper bound on message queue depth
pub const MAX_QUEUE_CAPACITY: usize = 4096;

// =============================================================================
// TIMEOUTS
// =============================================================================

/// Timer thread idle wait when nothing is armed
pub const TIMER_IDLE_WAIT: Duration = Duration::from_secs(1);

// =============================================================================
// NAMESPACE
// =============================================================================

/// Prefix under which `name_attach` registers channels
pub const NAME_PREFIX: &str = "/dev/name/local/";

// =============================================================================
// DEVICE PROTOCOL
// =============================================================================

/// Message types reserved for the resource-manager (device) protocol
pub const DEVICE_MESSAGE_TYPES: RangeInclusive<u16> = 0x100..=0x1FF;
