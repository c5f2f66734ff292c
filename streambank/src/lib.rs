#[cfg(feature = "streambank-base")]
pub use streambank_base as base;

#[cfg(feature = "streambank-loader")]
pub use streambank_loader as loader;
