#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]

pub mod cfg;
pub mod dag;
pub mod mempool;

pub use cfg::NodeConfig;
pub use dag::{Dag, DagError};
pub use mempool::Mempool;
