//! Download-and-zip pipeline with bounded concurrency and guaranteed cleanup

mod archive;
mod fetch;
mod finishing;
mod progress;
pub mod types;
pub(crate) mod worker;
