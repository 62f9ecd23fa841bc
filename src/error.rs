//! Unified error type for the host kernel.
//!
//! Each subsystem gets its own sub-error enum; [`Error`] wraps them so call
//! sites can match on category instead of downcasting. Mirrors the shape of
//! a hand-rolled error hierarchy: no derive macro, explicit `Display` impls,
//! `From` conversions into the top-level type.

#![allow(dead_code)]

use core::fmt;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    Gesture(GestureError),
    Scheduler(SchedulerError),
    Guest(GuestError),
    Queue(QueueError),
    Config(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Gesture(e) => write!(f, "gesture engine: {e}"),
            Error::Scheduler(e) => write!(f, "microtask scheduler: {e}"),
            Error::Guest(e) => write!(f, "guest lifecycle: {e}"),
            Error::Queue(e) => write!(f, "event queue: {e}"),
            Error::Config(msg) => write!(f, "config: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

#[derive(Debug)]
pub enum GestureError {
    /// `RegisterPolyline` rejected the definition (bad id, <2 points, non-positive tolerance).
    InvalidDefinition,
    /// `Remove` was asked to delete a system-flagged gesture.
    SystemGestureProtected,
    /// `Remove`/lookup referenced a handle that is not currently registered.
    UnknownHandle,
}

impl fmt::Display for GestureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GestureError::InvalidDefinition => write!(f, "invalid gesture definition"),
            GestureError::SystemGestureProtected => write!(f, "system gesture cannot be removed"),
            GestureError::UnknownHandle => write!(f, "unknown gesture handle"),
        }
    }
}

#[derive(Debug)]
pub enum SchedulerError {
    /// `Start` found no free slot among the fixed 64.
    TableFull,
    /// `Cancel`/internal resolve referenced a stale or out-of-range handle.
    NotFound,
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerError::TableFull => write!(f, "microtask table full"),
            SchedulerError::NotFound => write!(f, "handle not found"),
        }
    }
}

#[derive(Debug)]
pub enum GuestError {
    /// Load/instantiate failed to resolve a required export.
    MissingExport(&'static str),
    /// `contract_version()` returned something other than the host's constant.
    ContractMismatch { expected: i32, got: i32 },
    /// Any guest call raised; the controller is now in `Faulted`.
    GuestTrapped(String),
    /// Operation attempted while the controller was in an incompatible state.
    WrongState { expected: &'static str, actual: &'static str },
    /// `load_bytes`/`load_file` could not read or allocate the module.
    LoadFailed(String),
    /// App id in a switch request did not match the accepted forms.
    InvalidAppId,
}

impl fmt::Display for GuestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuestError::MissingExport(name) => write!(f, "missing required export '{name}'"),
            GuestError::ContractMismatch { expected, got } => {
                write!(f, "contract version mismatch: expected {expected}, got {got}")
            }
            GuestError::GuestTrapped(reason) => write!(f, "guest trapped: {reason}"),
            GuestError::WrongState { expected, actual } => {
                write!(f, "expected state {expected}, actual state {actual}")
            }
            GuestError::LoadFailed(reason) => write!(f, "load failed: {reason}"),
            GuestError::InvalidAppId => write!(f, "invalid app id"),
        }
    }
}

#[derive(Debug)]
pub enum QueueError {
    Full,
    Disconnected,
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueError::Full => write!(f, "queue full"),
            QueueError::Disconnected => write!(f, "queue disconnected"),
        }
    }
}

impl From<GestureError> for Error {
    fn from(e: GestureError) -> Self {
        Error::Gesture(e)
    }
}

impl From<SchedulerError> for Error {
    fn from(e: SchedulerError) -> Self {
        Error::Scheduler(e)
    }
}

impl From<GuestError> for Error {
    fn from(e: GuestError) -> Self {
        Error::Guest(e)
    }
}

impl From<QueueError> for Error {
    fn from(e: QueueError) -> Self {
        Error::Queue(e)
    }
}
