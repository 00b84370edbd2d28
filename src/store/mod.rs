//! Persistence for handled item ids.

pub mod seen;

pub use seen::SeenStore;
