//! ECG-Service: Device ingest, topic publisher and pipeline orchestrator
//!
//! Wires the signal chain between a line-oriented device transport and the
//! `raw` / `filtered` topics, with reconnect and lifecycle management.

pub mod config;
pub mod ingest;
pub mod orchestrator;
pub mod publisher;
pub mod state;

pub use config::{IngestConfig, PublisherConfig, ServiceConfig};
pub use ingest::{
    connector_for, parse_record, Connection, Connector, DeviceConnector, DeviceIngest, Endpoint,
    LineStream, SimulatedConnector, TcpConnector,
};
pub use orchestrator::{Pipeline, PipelineReport};
pub use publisher::{Frame, Publisher, PublisherServer, Subscription};
pub use state::PipelineState;
