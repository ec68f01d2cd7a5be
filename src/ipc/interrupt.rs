/*!
 * Interrupt Bridge
 * Thin fail-fast wrappers over the kernel interrupt primitives
 */

use super::context::IpcContext;
use crate::core::errors::{Fault, IpcResult, Status};
use crate::core::types::{InterruptHandle, IrqLine};
use log::info;
use std::sync::Arc;

impl IpcContext {
    /// Attach `handler` to `line`, acquiring I/O privilege first
    ///
    /// The handler runs on the thread that raises the line and must not block.
    pub fn attach_interrupt<F>(&self, line: IrqLine, handler: F) -> IpcResult<InterruptHandle>
    where
        F: Fn(IrqLine) + Send + Sync + 'static,
    {
        self.backend()
            .io_privilege(self.pid())
            .map_err(|e| Status::NoIoPrivilege(Fault::new(e, "io_privilege")))?;

        let id = self
            .backend()
            .interrupt_attach(self.pid(), line, Arc::new(handler))
            .map_err(|e| Status::NoInterruptAttach(Fault::new(e, format!("attach irq {}", line))))?;
        info!("pid {} attached interrupt {} on line {}", self.pid(), id, line);
        Ok(InterruptHandle(id))
    }

    pub fn detach_interrupt(&self, handle: InterruptHandle) -> IpcResult<()> {
        self.backend()
            .interrupt_detach(self.pid(), handle.0)
            .map_err(|e| Status::NoInterruptDetach(Fault::new(e, format!("detach interrupt {}", handle.0))))
    }

    /// Mask `line`; masks nest, returns the new depth
    pub fn mask_interrupt(&self, line: IrqLine, handle: InterruptHandle) -> IpcResult<u32> {
        self.backend()
            .interrupt_mask(line, handle.0)
            .map_err(|e| Status::NoInterruptAttach(Fault::new(e, format!("mask irq {}", line))))
    }

    /// Undo one mask; a raise latched meanwhile is delivered at depth zero
    pub fn unmask_interrupt(&self, line: IrqLine, handle: InterruptHandle) -> IpcResult<u32> {
        self.backend()
            .interrupt_unmask(line, handle.0)
            .map_err(|e| Status::NoInterruptAttach(Fault::new(e, format!("unmask irq {}", line))))
    }

    pub fn disable_interrupts(&self) {
        self.backend().interrupt_disable();
    }

    pub fn enable_interrupts(&self) {
        self.backend().interrupt_enable();
    }
}
