//! The ACS runtime: session tracking, Inform ingestion/provisioning, and the
//! HTTP dispatcher that ties them to CWMP (`spec.md` §4–§5).

pub mod acs;
pub mod dispatcher;
pub mod session_manager;

pub use acs::{Acs, AcsEvent};
pub use dispatcher::build_router;
