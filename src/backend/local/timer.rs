/*!
 * Timer Service
 *
 * One background thread drives every kernel timer. Expiries sit in a
 * min-heap keyed by deadline; periodic timers are rescheduled from their
 * previous deadline, not from the moment they fired, so cadence does not
 * drift under load. Rearming bumps a generation counter which invalidates
 * heap entries left from the previous schedule.
 */

use crate::backend::types::{KernelResult, PulseEvent, TimerSpec};
use crate::core::limits::TIMER_IDLE_WAIT;
use crate::core::types::{Pid, TimerId};
use log::{debug, error};
use nix::errno::Errno;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Delivers a timer's event; returns false once the kernel is gone
pub(super) type FireFn = Box<dyn Fn(Pid, PulseEvent) -> bool + Send + 'static>;

struct KernelTimer {
    owner: Pid,
    event: PulseEvent,
    interval: Duration,
    generation: u64,
}

struct TimerState {
    timers: HashMap<TimerId, KernelTimer>,
    queue: BinaryHeap<Reverse<(Instant, TimerId, u64)>>,
    next_id: TimerId,
    shutdown: bool,
}

struct Shared {
    state: Mutex<TimerState>,
    wake: Condvar,
}

pub(super) struct TimerService {
    shared: Arc<Shared>,
}

impl TimerService {
    pub fn start(fire: FireFn) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(TimerState {
                timers: HashMap::new(),
                queue: BinaryHeap::new(),
                next_id: 1,
                shutdown: false,
            }),
            wake: Condvar::new(),
        });

        let worker = Arc::clone(&shared);
        if let Err(e) = std::thread::Builder::new()
            .name("tcs-timer".to_string())
            .spawn(move || run(worker, fire))
        {
            error!("Failed to start timer thread, timers will not fire: {}", e);
        }

        Self { shared }
    }

    pub fn create(&self, owner: Pid, event: PulseEvent) -> TimerId {
        let mut state = self.shared.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.timers.insert(
            id,
            KernelTimer {
                owner,
                event,
                interval: Duration::ZERO,
                generation: 0,
            },
        );
        id
    }

    /// Arm, rearm or (with a zero delay) disarm a timer
    pub fn settime(&self, owner: Pid, id: TimerId, spec: TimerSpec) -> KernelResult<()> {
        let spec = spec.normalized();
        let mut guard = self.shared.state.lock();
        let state = &mut *guard;
        let timer = state
            .timers
            .get_mut(&id)
            .filter(|t| t.owner == owner)
            .ok_or(Errno::EINVAL)?;

        timer.generation += 1;
        timer.interval = spec.interval.to_duration();
        if spec.delay.is_zero() {
            debug!("Timer {} disarmed", id);
            return Ok(());
        }

        let when = Instant::now() + spec.delay.to_duration();
        state.queue.push(Reverse((when, id, timer.generation)));
        drop(guard);
        self.shared.wake.notify_one();
        Ok(())
    }

    pub fn delete(&self, owner: Pid, id: TimerId) -> KernelResult<()> {
        let mut state = self.shared.state.lock();
        match state.timers.get(&id) {
            Some(t) if t.owner == owner => {
                state.timers.remove(&id);
                Ok(())
            }
            _ => Err(Errno::EINVAL),
        }
    }

    /// Drop every timer owned by `owner`
    pub fn remove_owner(&self, owner: Pid) -> usize {
        let mut state = self.shared.state.lock();
        let before = state.timers.len();
        state.timers.retain(|_, t| t.owner != owner);
        before - state.timers.len()
    }
}

impl Drop for TimerService {
    fn drop(&mut self) {
        // Never join: the last kernel reference may be released on the timer thread itself
        self.shared.state.lock().shutdown = true;
        self.shared.wake.notify_all();
    }
}

fn run(shared: Arc<Shared>, fire: FireFn) {
    let mut state = shared.state.lock();
    loop {
        if state.shutdown {
            break;
        }

        let now = Instant::now();
        match state.queue.peek() {
            None => {
                shared.wake.wait_for(&mut state, TIMER_IDLE_WAIT);
                continue;
            }
            Some(Reverse((when, _, _))) if *when > now => {
                let when = *when;
                shared.wake.wait_until(&mut state, when);
                continue;
            }
            Some(_) => {}
        }

        let Some(Reverse((when, id, generation))) = state.queue.pop() else {
            continue;
        };

        let due = {
            let TimerState { timers, queue, .. } = &mut *state;
            match timers.get(&id) {
                Some(timer) if timer.generation == generation => {
                    if !timer.interval.is_zero() {
                        queue.push(Reverse((when + timer.interval, id, generation)));
                    }
                    Some((timer.owner, timer.event))
                }
                // Deleted or rearmed since this entry was queued
                _ => None,
            }
        };

        if let Some((owner, event)) = due {
            let alive = MutexGuard::unlocked(&mut state, || fire(owner, event));
            if !alive {
                break;
            }
        }
    }
    debug!("Timer thread exiting");
}
