pub mod exports;
pub mod kubeconfig;
pub mod orchestrator;
