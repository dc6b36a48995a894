//! Data model for the ACS core: devices, their raw parameters, and tasks.

pub mod device;
pub mod task;

pub use device::{Device, DeviceParameter, DeviceStatus, DeviceStatusLogEntry};
pub use task::{Task, TaskStatus, TaskType};
