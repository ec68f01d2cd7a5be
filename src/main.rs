/*!
 * TCS Node Demo
 *
 * Runs a small node controller on the local kernel:
 * - a focus device served through the resource manager
 * - a heartbeat timer pulsing the controller channel
 * - a client driving the focus device
 *
 * Stops on Ctrl+C or after TCS_DEMO_SECONDS (default 5).
 */

use anyhow::Context;
use nix::errno::Errno;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use tcs_ipc::{
    default_backend, init_tracing, ControlReply, DeviceHandlers, Event, IpcConfig, IpcContext, Ocb,
    Origin, PulseCode, ResourceManager, Status, TimeSpec,
};

/// Control code: move the focuser by a signed step count
const FOCUS_MOVE: i32 = 0x0101;
/// Control code: report the current position
const FOCUS_POSITION: i32 = 0x0102;

#[derive(Default)]
struct Focuser {
    position: i32,
    log: Vec<u8>,
}

impl DeviceHandlers for Focuser {
    fn open(&mut self, path: &str, _ioflag: u32, origin: &Origin) -> Result<(), Errno> {
        info!(path, client = origin.pid, "focuser opened");
        Ok(())
    }

    fn read(&mut self, ocb: &Ocb, length: usize) -> Result<Vec<u8>, Errno> {
        let start = usize::try_from(ocb.offset).unwrap_or(usize::MAX).min(self.log.len());
        let end = start.saturating_add(length).min(self.log.len());
        Ok(self.log[start..end].to_vec())
    }

    fn write(&mut self, _ocb: &Ocb, bytes: &[u8]) -> Result<usize, Errno> {
        self.log.extend_from_slice(bytes);
        Ok(bytes.len())
    }

    fn control(
        &mut self,
        _ocb: &Ocb,
        code: i32,
        input: &[u8],
        _out_capacity: usize,
    ) -> Result<ControlReply, Errno> {
        match code {
            FOCUS_MOVE => {
                let raw: [u8; 4] = input.get(..4).and_then(|b| b.try_into().ok()).ok_or(Errno::EINVAL)?;
                self.position = self.position.saturating_add(i32::from_le_bytes(raw));
                Ok(ControlReply::new(0, Vec::new()))
            }
            FOCUS_POSITION => Ok(ControlReply::new(0, self.position.to_le_bytes().to_vec())),
            _ => Err(Errno::ENOTTY),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("TCS node demo starting...");
    let kernel = default_backend();
    let run_for = std::env::var("TCS_DEMO_SECONDS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(5);

    let shutdown = Arc::new(AtomicBool::new(false));

    // Focus device node
    let node = IpcContext::spawn(&kernel, "focus-node", IpcConfig::from_env());
    let mut focuser = ResourceManager::register_device(&node, "focus", Focuser::default())
        .context("register focus device")?;
    info!(path = focuser.path(), "Focus device registered");
    let device_stop = Arc::clone(&shutdown);
    let device = tokio::task::spawn_blocking(move || {
        let result = focuser.run(&device_stop);
        if let Err(e) = focuser.unregister() {
            warn!(error = %e, "Focus device unregister failed");
        }
        result
    });

    // Controller with a 100ms heartbeat
    let controller = IpcContext::spawn(&kernel, "controller", IpcConfig::from_env());
    let heartbeat = controller
        .create_timed_pulse(TimeSpec::from_millis(100), TimeSpec::from_millis(100))
        .context("arm heartbeat")?;
    let controller_stop = Arc::clone(&shutdown);
    let heartbeats = tokio::task::spawn_blocking(move || {
        let mut beats = 0u64;
        while !controller_stop.load(Ordering::Relaxed) {
            match controller.receive(Some(Duration::from_millis(250))) {
                Ok((Event::Pulse { code: PulseCode::Timed, .. }, _)) => beats += 1,
                Ok((event, _)) => info!(?event, "Controller event"),
                Err(e) if e.is_timeout() => continue,
                Err(e) => {
                    error!(error = %e, "Controller receive failed");
                    break;
                }
            }
        }
        if let Err(e) = heartbeat.cancel() {
            warn!(error = %e, "Heartbeat cancel failed");
        }
        info!(beats, stats = ?controller.stats(), "Controller stopped");
    });

    // Client drives the focuser once
    let client = IpcContext::spawn(&kernel, "focus-client", IpcConfig::from_env());
    let session = tokio::task::spawn_blocking(move || -> Result<i32, Status> {
        let mut file = client.open_device("/dev/focus", 0)?;
        file.set_timeout(Some(Duration::from_secs(1)));
        file.write(b"move +250\n")?;
        file.control(FOCUS_MOVE, &250i32.to_le_bytes(), 0)?;
        let reply = file.control(FOCUS_POSITION, &[], 4)?;
        file.close()?;
        let raw: [u8; 4] = reply.out.as_slice().try_into().unwrap_or_default();
        Ok(i32::from_le_bytes(raw))
    });
    match session.await.context("client task")? {
        Ok(position) => info!(position, "Focuser position"),
        Err(e) => error!(error = %e, "Focus session failed"),
    }

    info!("Node running - press Ctrl+C to exit");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
        _ = tokio::time::sleep(Duration::from_secs(run_for)) => info!("Run time elapsed"),
    }

    shutdown.store(true, Ordering::Relaxed);
    heartbeats.await.context("controller task")?;
    device
        .await
        .context("device task")?
        .context("focus device loop")?;

    info!("TCS node demo stopped");
    Ok(())
}
