pub mod domain;
pub mod telemetry;
pub mod verification;
