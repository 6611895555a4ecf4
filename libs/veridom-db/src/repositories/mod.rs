pub mod attempt_repo;
pub mod domain_repo;
pub mod telemetry_repo;
