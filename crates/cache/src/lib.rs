pub mod clean;
pub mod fingerprint;
pub mod store;

pub use fingerprint::compute_fingerprint;
pub use store::EntityCache;
