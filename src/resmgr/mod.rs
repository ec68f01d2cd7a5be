/*!
 * Resource Manager
 * Expose a process as a character device and talk to such devices
 */

pub mod client;
pub mod dispatch;
pub mod types;
pub mod wire;

pub use client::DeviceFile;
pub use dispatch::{device_path, ResourceManager};
pub use types::{ControlReply, DeviceHandlers, DeviceState, Ocb, Origin, ResourceRequest};
