// eqvio_core/src/sensors/mod.rs

pub mod buffer;

pub use buffer::{PushStatus, TimeOrderedQueue};
