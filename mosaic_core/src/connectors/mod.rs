// Synthetic connector (always available)
pub mod mock;

// Local filesystem connector
#[cfg(feature = "localfs")]
pub mod localfs;
