//! Error types for the coordination core.
//!
//! One enum per concern, aggregated into [`ProcxError`] for callers that
//! cross module boundaries (the binary, the shutdown path).

use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("shared registry init failed: {0}")]
    Init(String),
    #[error("shared registry gate failed: {0}")]
    Gate(String),
    #[error("process table full ({0} slots)")]
    Full(usize),
    #[error("no active record for pid {0}")]
    NotFound(i32),
}

#[derive(Debug, Error)]
pub enum MembershipError {
    #[error("all {0} instance slots are taken")]
    Rejected(usize),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("message queue create failed: {0}")]
    Create(io::Error),
    #[error("message queue send failed: {0}")]
    Send(io::Error),
    #[error("message queue receive failed: {0}")]
    Receive(io::Error),
    #[error("notification channel for pid {0} is full")]
    ChannelFull(i32),
    #[error("message queue removed")]
    Removed,
    #[error("receive interrupted by signal")]
    Interrupted,
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("empty command")]
    EmptyCommand,
    #[error("failed to spawn '{command}': {source}")]
    Spawn { command: String, source: io::Error },
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Bus(#[from] BusError),
}

#[derive(Debug, Error)]
pub enum ProcxError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Membership(#[from] MembershipError),
    #[error(transparent)]
    Bus(#[from] BusError),
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type ProcxResult<T> = Result<T, ProcxError>;
