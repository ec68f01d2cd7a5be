/*!
 * Error Types
 * Flat status taxonomy shared by every node controller, with thiserror,
 * miette and serde support
 */

use miette::Diagnostic;
use nix::errno::Errno;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type for IPC layer operations
///
/// # Must Use
/// Every call returns its own status; the layer never retries on the caller's behalf
pub type IpcResult<T> = Result<T, Status>;

/// Context of a failed kernel call: the errno it returned plus what was attempted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fault {
    /// Raw errno, 0 when the failure did not come from the kernel
    pub errno: i32,
    pub detail: String,
}

impl Fault {
    pub fn new(errno: Errno, detail: impl Into<String>) -> Self {
        Self {
            errno: errno as i32,
            detail: detail.into(),
        }
    }

    /// Failure detected by the layer itself, no errno attached
    pub fn local(detail: impl Into<String>) -> Self {
        Self {
            errno: 0,
            detail: detail.into(),
        }
    }

    #[must_use]
    pub fn errno(&self) -> Option<Errno> {
        if self.errno == 0 {
            None
        } else {
            Some(Errno::from_raw(self.errno))
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errno() {
            Some(errno) => write!(f, "{} ({})", self.detail, errno),
            None => f.write_str(&self.detail),
        }
    }
}

/// Flat status taxonomy
///
/// Codes from PCI/watchdog/terminal handling live here too because node
/// controllers report them through the same channel as IPC failures.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Diagnostic)]
#[serde(rename_all = "snake_case", tag = "status", content = "details")]
pub enum Status {
    #[error("Operating system not supported: {0}")]
    #[diagnostic(code(status::no_os_support), help("This build has no backend for the host kernel."))]
    NoOsSupport(Fault),

    #[error("No I/O privilege: {0}")]
    #[diagnostic(code(status::no_io_privilege), help("Run the node with I/O privileges (root) to touch hardware."))]
    NoIoPrivilege(Fault),

    #[error("No PCI BIOS: {0}")]
    #[diagnostic(code(status::no_pci_bios))]
    NoPciBios(Fault),

    #[error("PCI configuration read failed: {0}")]
    #[diagnostic(code(status::no_pci_read))]
    NoPciRead(Fault),

    #[error("PCI memory map failed: {0}")]
    #[diagnostic(code(status::no_pci_map))]
    NoPciMap(Fault),

    #[error("PCI memory unmap failed: {0}")]
    #[diagnostic(code(status::pci_unmap_failed))]
    PciUnmapFailed(Fault),

    #[error("Operating system information unavailable: {0}")]
    #[diagnostic(code(status::no_os_info))]
    NoOsInfo(Fault),

    #[error("PCI device not found: {0}")]
    #[diagnostic(code(status::no_pci_device), help("Check the card is seated and the vendor/device ids."))]
    NoPciDevice(Fault),

    #[error("Shared memory error: {0}")]
    #[diagnostic(code(status::shared_mem_error))]
    SharedMemError(Fault),

    #[error("Cannot set scheduler: {0}")]
    #[diagnostic(code(status::no_set_scheduler), help("Real-time priorities need elevated privileges."))]
    NoSetScheduler(Fault),

    #[error("Cannot create timer: {0}")]
    #[diagnostic(code(status::no_timer), help("The kernel refused a new timer. Release unused timed pulses."))]
    NoTimer(Fault),

    #[error("Cannot update timer: {0}")]
    #[diagnostic(code(status::no_timer_update), help("The timer may have been deleted, or the schedule is invalid."))]
    NoTimerUpdate(Fault),

    #[error("Cannot set clock period: {0}")]
    #[diagnostic(code(status::no_set_clock_period))]
    NoSetClockPeriod(Fault),

    #[error("Cannot create pulse: {0}")]
    #[diagnostic(code(status::no_pulse), help("Pulse sources need a connection to this process's channel."))]
    NoPulse(Fault),

    #[error("Not a pulse: {0}")]
    #[diagnostic(code(status::not_a_pulse), help("The handle is not a live pulse connection."))]
    NotAPulse(Fault),

    #[error("Pulse receive failed: {0}")]
    #[diagnostic(code(status::pulse_receive_error))]
    PulseReceiveError(Fault),

    #[error("Pulse send failed: {0}")]
    #[diagnostic(code(status::pulse_send_error), help("The connection may be detached or its channel destroyed."))]
    PulseSendError(Fault),

    #[error("Cannot create channel: {0}")]
    #[diagnostic(code(status::no_channel), help("The process channel limit may be exhausted."))]
    NoChannel(Fault),

    #[error("Cannot attach connection: {0}")]
    #[diagnostic(code(status::no_attach), help("The peer process or channel does not exist."))]
    NoAttach(Fault),

    #[error("Cannot detach connection: {0}")]
    #[diagnostic(code(status::no_detach), help("The connection was never attached or is already detached."))]
    NoDetach(Fault),

    #[error("Cannot open name: {0}")]
    #[diagnostic(code(status::no_name_open), help("No process has attached this name."))]
    NoNameOpen(Fault),

    #[error("Cannot close name: {0}")]
    #[diagnostic(code(status::no_name_close))]
    NoNameClose(Fault),

    #[error("Message receive failed: {0}")]
    #[diagnostic(code(status::message_receive_error))]
    MessageReceiveError(Fault),

    #[error("Message send failed: {0}")]
    #[diagnostic(code(status::message_send_error), help("The peer may have exited or rejected the message."))]
    MessageSendError(Fault),

    #[error("Message reply failed: {0}")]
    #[diagnostic(code(status::message_reply_error), help("The sender may have timed out or exited before the reply."))]
    MessageReplyError(Fault),

    #[error("Terminal read failed: {0}")]
    #[diagnostic(code(status::no_terminal_read))]
    NoTerminalRead(Fault),

    #[error("Watchdog error: {0}")]
    #[diagnostic(code(status::watchdog_error))]
    WatchdogError(Fault),

    #[error("No device number: {0}")]
    #[diagnostic(code(status::no_device_number))]
    NoDeviceNumber(Fault),

    #[error("Cannot attach path prefix: {0}")]
    #[diagnostic(code(status::no_prefix_attach), help("Another process already owns this path."))]
    NoPrefixAttach(Fault),

    #[error("Cannot attach interrupt: {0}")]
    #[diagnostic(code(status::no_interrupt_attach))]
    NoInterruptAttach(Fault),

    #[error("Cannot detach interrupt: {0}")]
    #[diagnostic(code(status::no_interrupt_detach))]
    NoInterruptDetach(Fault),

    #[error("Cannot create dispatch handle: {0}")]
    #[diagnostic(code(status::no_dispatch_handle))]
    NoDispatchHandle(Fault),

    #[error("Resource manager error: {0}")]
    #[diagnostic(code(status::resource_manager_error))]
    ResourceManagerError(Fault),

    #[error("Resource request receive failed: {0}")]
    #[diagnostic(code(status::resource_receive_error))]
    ResourceReceiveError(Fault),

    #[error("Resource reply failed: {0}")]
    #[diagnostic(code(status::resource_reply_error))]
    ResourceReplyError(Fault),

    #[error("Device read failed: {0}")]
    #[diagnostic(code(status::message_read_error))]
    MessageReadError(Fault),

    #[error("Device write failed: {0}")]
    #[diagnostic(code(status::message_write_error))]
    MessageWriteError(Fault),

    #[error("Device control failed: {0}")]
    #[diagnostic(code(status::device_control_error))]
    DeviceControlError(Fault),

    #[error("No input handler: {0}")]
    #[diagnostic(code(status::no_input_handler))]
    NoInputHandler(Fault),

    #[error("File error: {0}")]
    #[diagnostic(code(status::file_error))]
    FileError(Fault),

    #[error("Interrupted by signal: {0}")]
    #[diagnostic(code(status::interrupted), help("Retry the call or treat it as a spurious wake."))]
    Interrupted(Fault),

    #[error("Nothing pending: {0}")]
    #[diagnostic(code(status::would_block), help("A zero timeout never blocks. Use a timeout to wait for traffic."))]
    WouldBlock(Fault),

    #[error("Operation timed out after {elapsed_ms}ms (timeout: {}ms)", timeout_ms.map(|t| t.to_string()).unwrap_or_else(|| "none".to_string()))]
    #[diagnostic(code(status::timeout), help("The peer did not answer in time. Retry policy belongs to the caller."))]
    Timeout {
        elapsed_ms: u64,
        timeout_ms: Option<u64>,
    },
}

impl Status {
    /// Fault context carried by this status, if any
    #[must_use]
    pub fn fault(&self) -> Option<&Fault> {
        use Status::*;
        match self {
            NoOsSupport(f) | NoIoPrivilege(f) | NoPciBios(f) | NoPciRead(f) | NoPciMap(f)
            | PciUnmapFailed(f) | NoOsInfo(f) | NoPciDevice(f) | SharedMemError(f)
            | NoSetScheduler(f) | NoTimer(f) | NoTimerUpdate(f) | NoSetClockPeriod(f)
            | NoPulse(f) | NotAPulse(f) | PulseReceiveError(f) | PulseSendError(f)
            | NoChannel(f) | NoAttach(f) | NoDetach(f) | NoNameOpen(f) | NoNameClose(f)
            | MessageReceiveError(f) | MessageSendError(f) | MessageReplyError(f)
            | NoTerminalRead(f) | WatchdogError(f) | NoDeviceNumber(f) | NoPrefixAttach(f)
            | NoInterruptAttach(f) | NoInterruptDetach(f) | NoDispatchHandle(f)
            | ResourceManagerError(f) | ResourceReceiveError(f) | ResourceReplyError(f)
            | MessageReadError(f) | MessageWriteError(f) | DeviceControlError(f)
            | NoInputHandler(f) | FileError(f) | Interrupted(f) | WouldBlock(f) => Some(f),
            Timeout { .. } => None,
        }
    }

    /// Kernel errno behind this status, if the failure came from a kernel call
    #[must_use]
    pub fn errno(&self) -> Option<Errno> {
        self.fault().and_then(Fault::errno)
    }

    /// Re-wrap as a fault for another status, keeping the errno
    #[must_use]
    pub fn into_fault(self, what: &str) -> Fault {
        match self.fault() {
            Some(f) => Fault {
                errno: f.errno,
                detail: format!("{}: {}", what, f.detail),
            },
            None => Fault::local(format!("{}: {}", what, self)),
        }
    }

    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Status::Timeout { .. } | Status::WouldBlock(_))
    }

    #[inline]
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Status::Interrupted(_))
    }
}
