pub mod build;
pub mod manifest;

pub use build::{build, EventJob, Job, Report, Summary};
pub use manifest::{EventSpec, Manifest, MnemonicSpec, TableSpec};
