//! Overheight Detection Protocol Implementations
//!
//! This library provides the wire layer spoken between the field agent and the
//! CVM monitoring server, plus the digital-input hardware contract.
//!
//! # Architecture
//!
//! ```text
//! ohd-protocols
//!     ├── timestamp (plain date/time record)
//!     ├── xml       (restricted tree parser: Leaf / Node)
//!     ├── framing   (4-byte length + 4-byte reserved + payload)
//!     ├── messages  (retrieveDataReq / retrieveDataResp / overheightUpdateMsg)
//!     └── dio       (DiDriver trait, null and sysfs drivers)
//! ```
//!
//! The session logic, device registry and reactor live in `ohdsrv`, which
//! composes these pieces with service-layer concerns (config, persistence,
//! logging).

pub mod dio;
pub mod error;
pub mod framing;
pub mod messages;
pub mod timestamp;
pub mod xml;

pub use dio::{DiDriver, DiReading, NullDiDriver, SysfsDiDriver, MAX_CHANNELS};
pub use error::{DioError, FramingError, XmlError};
pub use framing::{read_frame, write_frame, Frame, MAX_MESSAGE_LENGTH};
pub use messages::{
    overheight_update, retrieve_data_response, DeviceReport, MessageHeader, RetrieveDataRequest,
};
pub use timestamp::Timestamp;
pub use xml::{XmlElement, XmlNode};
