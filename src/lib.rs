pub mod config;
pub mod dab;
pub mod edi;
pub mod eti;
pub mod inputs;
pub mod mux;
pub mod outputs;
pub mod utils;

pub use config::Config;
pub use dab::ensemble::Ensemble;
pub use mux::{Mux, RcEvent, RcHandle};
