//! Guest Lifecycle Controller and its supporting ABI contract/runtime port.

pub mod contract;
pub mod controller;
pub mod runtime;
pub mod wasmtime_runtime;

pub use controller::{AppSource, GuestLifecycleController, GuestState, resolve_app_id};
pub use runtime::{GuestInstance, GuestRuntime};
