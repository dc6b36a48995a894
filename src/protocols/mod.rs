//! Wire protocol implementations for the ACS.

pub mod cwmp;

pub use cwmp::{DeviceIdStruct, Fault, InboundRpc, ParsedEnvelope};
