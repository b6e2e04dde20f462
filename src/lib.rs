use crate::config::BootstrapConfig;
use crate::domain::cluster::request::BootstrapRequest;
use crate::error::Result;
use crate::loader::parser::parse_json_file;

pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod loader;
pub mod logger;

pub use crate::domain::bootstrap::orchestrator::{BootstrapOrchestrator, BootstrapPlan, BootstrapResult};

/// Loads an infrastructure description file and turns it into a validated request
/// together with the bootstrap configuration embedded in it.
pub fn load_bootstrap_request(file_path: &str) -> Result<(BootstrapRequest, BootstrapConfig)> {
    let dto: api::infrastructure_dto::InfrastructureDto = parse_json_file(file_path)?;
    log::info!("Infrastructure file '{}' parsed successfully.", file_path);

    let (request, config) = BootstrapRequest::from_dto(dto)?;
    log::info!(
        "Bootstrap request for cluster '{}' constructed: {} control-plane node(s), {} worker(s).",
        request.cluster_name,
        request.topology.control_plane().len(),
        request.topology.workers().len()
    );

    Ok((request, config))
}
