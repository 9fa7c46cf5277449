//! Overheight detection field agent
//!
//! Watches digital sense lines for overheight vehicles and detector faults
//! and reports them to the CVM over the framed XML protocol. The agent
//! answers `retrieveDataReq` with the state of every device and pushes an
//! `overheightUpdateMsg` whenever an event or status change occurs.

pub mod agent;
pub mod bootstrap;
pub mod config;
pub mod control;
pub mod error;
pub mod poller;
pub mod reactor;
pub mod registry;
pub mod session;
pub mod status;
pub mod store;

pub use agent::{Agent, Push};
pub use control::{AdminCommand, AdminHandle};
pub use error::{OhdSrvError, Result};
pub use reactor::Reactor;
pub use registry::{Generation, Registry, RegistryLoader};
pub use status::DeviceStatus;
