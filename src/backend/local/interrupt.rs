/*!
 * Interrupt Controller
 *
 * Simulated interrupt lines. A raise on a masked line, or while interrupts
 * are globally disabled, is latched and delivered once when the line
 * becomes deliverable again. Handlers always run outside the lock.
 */

use crate::backend::types::{InterruptHandler, KernelResult};
use crate::core::types::{InterruptId, IrqLine, Pid};
use log::debug;
use nix::errno::Errno;
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Default)]
struct Line {
    handlers: Vec<(InterruptId, InterruptHandler)>,
    mask_depth: u32,
    pending: bool,
}

impl Line {
    fn deliverable(&self, enabled: bool) -> bool {
        enabled && self.mask_depth == 0
    }
}

struct ControllerState {
    lines: HashMap<IrqLine, Line>,
    attached: HashMap<InterruptId, (Pid, IrqLine)>,
    next_id: InterruptId,
    enabled: bool,
}

pub(super) struct InterruptController {
    state: Mutex<ControllerState>,
}

impl InterruptController {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ControllerState {
                lines: HashMap::new(),
                attached: HashMap::new(),
                next_id: 1,
                enabled: true,
            }),
        }
    }

    pub fn attach(&self, owner: Pid, line: IrqLine, handler: InterruptHandler) -> InterruptId {
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.attached.insert(id, (owner, line));
        state.lines.entry(line).or_default().handlers.push((id, handler));
        debug!("Interrupt {} attached to line {} by pid {}", id, line, owner);
        id
    }

    pub fn detach(&self, owner: Pid, id: InterruptId) -> KernelResult<()> {
        let mut state = self.state.lock();
        match state.attached.get(&id) {
            Some(&(pid, line)) if pid == owner => {
                state.attached.remove(&id);
                if let Some(l) = state.lines.get_mut(&line) {
                    l.handlers.retain(|(h, _)| *h != id);
                }
                Ok(())
            }
            _ => Err(Errno::EINVAL),
        }
    }

    /// Increase the mask depth of `line`; `id` must be attached to it
    pub fn mask(&self, line: IrqLine, id: InterruptId) -> KernelResult<u32> {
        let mut state = self.state.lock();
        Self::check_attached(&state, line, id)?;
        let l = state.lines.entry(line).or_default();
        l.mask_depth += 1;
        Ok(l.mask_depth)
    }

    /// Decrease the mask depth, delivering a latched raise at depth zero
    pub fn unmask(&self, line: IrqLine, id: InterruptId) -> KernelResult<u32> {
        let (depth, handlers) = {
            let mut state = self.state.lock();
            Self::check_attached(&state, line, id)?;
            let enabled = state.enabled;
            let l = state.lines.entry(line).or_default();
            l.mask_depth = l.mask_depth.saturating_sub(1);
            (l.mask_depth, Self::take_pending(l, enabled))
        };
        Self::run(line, handlers);
        Ok(depth)
    }

    pub fn disable(&self) {
        self.state.lock().enabled = false;
    }

    /// Re-enable delivery and flush every deliverable latched raise
    pub fn enable(&self) {
        let flushed: Vec<(IrqLine, Vec<InterruptHandler>)> = {
            let mut state = self.state.lock();
            state.enabled = true;
            state
                .lines
                .iter_mut()
                .map(|(line, l)| (*line, Self::take_pending(l, true)))
                .filter(|(_, handlers)| !handlers.is_empty())
                .collect()
        };
        for (line, handlers) in flushed {
            Self::run(line, handlers);
        }
    }

    /// Raise `line`, returning how many handlers ran
    pub fn raise(&self, line: IrqLine) -> usize {
        let handlers = {
            let mut state = self.state.lock();
            let enabled = state.enabled;
            let Some(l) = state.lines.get_mut(&line) else {
                return 0;
            };
            if !l.deliverable(enabled) {
                l.pending = true;
                return 0;
            }
            l.handlers.iter().map(|(_, h)| h.clone()).collect::<Vec<_>>()
        };
        Self::run(line, handlers)
    }

    pub fn remove_owner(&self, owner: Pid) {
        let mut state = self.state.lock();
        let ids: Vec<InterruptId> = state
            .attached
            .iter()
            .filter(|(_, (pid, _))| *pid == owner)
            .map(|(id, _)| *id)
            .collect();
        for id in ids {
            if let Some((_, line)) = state.attached.remove(&id) {
                if let Some(l) = state.lines.get_mut(&line) {
                    l.handlers.retain(|(h, _)| *h != id);
                }
            }
        }
    }

    fn check_attached(state: &ControllerState, line: IrqLine, id: InterruptId) -> KernelResult<()> {
        match state.attached.get(&id) {
            Some(&(_, attached_line)) if attached_line == line => Ok(()),
            _ => Err(Errno::EINVAL),
        }
    }

    fn take_pending(line: &mut Line, enabled: bool) -> Vec<InterruptHandler> {
        if line.pending && line.deliverable(enabled) {
            line.pending = false;
            line.handlers.iter().map(|(_, h)| h.clone()).collect()
        } else {
            Vec::new()
        }
    }

    fn run(line: IrqLine, handlers: Vec<InterruptHandler>) -> usize {
        for handler in &handlers {
            handler(line);
        }
        handlers.len()
    }
}
