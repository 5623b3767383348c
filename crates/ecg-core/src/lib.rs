//! ECG-Core: Foundation types for the ECG stream processor
//!
//! Electrode samples, derived leads, outbound messages, capture timestamps
//! and the error taxonomy shared by every stage of the pipeline.

pub mod error;
pub mod message;
pub mod sample;
pub mod timestamp;

pub use error::{EcgError, EcgResult};
pub use message::{FilteredPayload, LeadsPayload, OutboundMessage, RawPayload, Topic};
pub use sample::{
    DerivedLeads, ElectrodeRecord, FilteredSample, RawSample, SessionId,
};
pub use timestamp::{Clock, SteppedClock, SystemClock, Timestamp};
