//! # gp-gateway
//!
//! Request intake and the approval gateway for Gated Publish.
//!
//! [`Pipeline`] takes a change request from creation to
//! `awaiting_decision`: fresh workspace, apply, validate, local checkpoint.
//! [`ApprovalGateway`] is the only component that resolves a workflow from
//! an external decision (approve, reject soft, reject hard) and the entry
//! point for reverting the last publish. [`GatedPublish`] wires both to one
//! registry and one workspace from a [`PipelineConfig`].

pub mod approval;
pub mod config;
pub mod error;
pub mod oracle;
pub mod pipeline;
pub mod request;
pub mod service;
pub mod slots;

pub use approval::{ApprovalGateway, Decision, DecisionOutcome};
pub use config::{ConfigError, PipelineConfig};
pub use error::GatewayError;
pub use oracle::{AcceptAllOracle, CommandOracle, ValidationOracle, ValidationReport, Verdict};
pub use pipeline::Pipeline;
pub use request::{ChangeRequest, ChangeSet};
pub use service::GatedPublish;
pub use slots::WorkflowSlots;
