//! Service implementations
//!
//! Everything a test touches: the backend client and entity ledger, config
//! rendering and storage, and the helper processes with their readiness
//! matching.

pub mod command_runner;
pub mod config_composer;
pub mod config_store;
pub mod entity_manager;
pub mod hawkbit_client;
pub mod install_service;
pub mod output_matcher;
pub mod port_allocator;
pub mod process_supervisor;
pub mod proxy;

#[cfg(test)]
mod tests;

pub use command_runner::{CommandOutput, CommandSpec, run_command};
pub use config_composer::{ComposedConfig, ConfigTemplate, OptionOverride, OptionRemoval};
pub use config_store::ConfigStore;
pub use entity_manager::{EntityKey, EntityManager};
pub use hawkbit_client::HawkbitMgmtClient;
pub use install_service::InstallServiceSpec;
pub use output_matcher::{Marker, MatchOutcome, OutputMatcher};
pub use port_allocator::PortAllocator;
pub use process_supervisor::{ProcessSpec, ProcessState, SupervisedProcess};
pub use proxy::{ProxyController, ProxyDescriptor, ProxySettings};
