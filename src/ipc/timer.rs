/*!
 * Timer Service
 * Kernel timers delivering `Timed` pulses to the owning channel
 */

use super::context::IpcContext;
use super::types::PulseCode;
use crate::backend::{IpcBackend, PulseEvent, TimerSpec};
use crate::core::errors::{Fault, IpcResult, Status};
use crate::core::types::{ConnectionHandle, Pid, TimeSpec, TimerHandle};
use log::{debug, warn};
use std::fmt;
use std::sync::Arc;

/// A kernel timer plus the self-connection it fires through
///
/// The timer is always deleted before the connection is detached, either by
/// `cancel` or on drop.
pub struct TimedPulse {
    connection: ConnectionHandle,
    timer: TimerHandle,
    delay: TimeSpec,
    interval: TimeSpec,
    backend: Arc<dyn IpcBackend>,
    pid: Pid,
    released: bool,
}

impl TimedPulse {
    /// Connection whose id arrives as the pulse's sender value
    #[inline]
    pub fn connection(&self) -> ConnectionHandle {
        self.connection
    }

    #[inline]
    pub fn timer(&self) -> TimerHandle {
        self.timer
    }

    pub fn delay(&self) -> TimeSpec {
        self.delay
    }

    pub fn interval(&self) -> TimeSpec {
        self.interval
    }

    /// Delete the timer, then detach its connection
    pub fn cancel(mut self) -> IpcResult<()> {
        self.release()
    }

    fn release(&mut self) -> IpcResult<()> {
        self.released = true;
        self.backend
            .timer_delete(self.pid, self.timer.0)
            .map_err(|e| Status::NoTimerUpdate(Fault::new(e, format!("delete timer {}", self.timer.0))))?;
        self.backend
            .connect_detach(self.pid, self.connection.coid())
            .map_err(|e| Status::NoDetach(Fault::new(e, format!("detach {}", self.connection))))?;
        debug!("pid {} released timed pulse {}", self.pid, self.connection);
        Ok(())
    }
}

impl Drop for TimedPulse {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.release() {
                warn!("Failed to release timed pulse {}: {}", self.connection, e);
            }
        }
    }
}

impl fmt::Debug for TimedPulse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimedPulse")
            .field("connection", &self.connection)
            .field("timer", &self.timer)
            .field("delay", &self.delay)
            .field("interval", &self.interval)
            .finish()
    }
}

impl IpcContext {
    /// Create and arm a timer delivering `Timed` pulses
    ///
    /// `delay` is the first expiry and `interval` the repeat period; a zero
    /// interval makes it one-shot and a zero delay leaves it disarmed.
    pub fn create_timed_pulse(
        &self,
        delay: impl Into<TimeSpec>,
        interval: impl Into<TimeSpec>,
    ) -> IpcResult<TimedPulse> {
        let connection = self
            .attach_self()
            .map_err(|e| Status::NoTimer(e.into_fault("timer connection")))?;

        let event = PulseEvent {
            coid: connection.coid(),
            code: PulseCode::Timed.raw(),
            value: connection.as_pulse_value(),
        };
        let timer = match self.backend().timer_create(self.pid(), event) {
            Ok(id) => TimerHandle(id),
            Err(e) => {
                let _ = self.detach(connection);
                return Err(Status::NoTimer(Fault::new(e, "timer_create")));
            }
        };

        // From here on, drop releases both the timer and the connection
        let mut pulse = TimedPulse {
            connection,
            timer,
            delay: TimeSpec::ZERO,
            interval: TimeSpec::ZERO,
            backend: Arc::clone(self.backend()),
            pid: self.pid(),
            released: false,
        };
        self.rearm(&mut pulse, delay, interval)?;
        Ok(pulse)
    }

    /// Replace the schedule of an existing timed pulse in place
    pub fn rearm(
        &self,
        pulse: &mut TimedPulse,
        delay: impl Into<TimeSpec>,
        interval: impl Into<TimeSpec>,
    ) -> IpcResult<()> {
        let spec = TimerSpec::new(delay, interval).normalized();
        self.backend()
            .timer_settime(self.pid(), pulse.timer.0, spec)
            .map_err(|e| Status::NoTimerUpdate(Fault::new(e, format!("arm timer {}", pulse.timer.0))))?;

        pulse.delay = spec.delay;
        pulse.interval = spec.interval;
        if !spec.delay.is_zero() {
            self.counters().timer_armed();
        }
        debug!(
            "pid {} armed timer {}: delay {:?}, interval {:?}",
            self.pid(),
            pulse.timer.0,
            spec.delay,
            spec.interval
        );
        Ok(())
    }
}
