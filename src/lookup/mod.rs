pub mod rdns;

pub use rdns::*;
