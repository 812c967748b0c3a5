//! Core orchestration logic: Action Registry, Ready Queue, Event Bus,
//! Submission Planner, Worker Pool, and Coordinator.
//!
//! Durable state lives in `skein-db`; this crate owns the in-process
//! transport (queue, bus) and the scheduling/execution loops built on top
//! of it.

pub mod action;
pub mod coordinator;
pub mod events;
pub mod planner;
pub mod queue;
pub mod worker;
