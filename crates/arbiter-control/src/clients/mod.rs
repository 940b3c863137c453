//! Clients for the remote platform.
//!
//! Two seams: the deployment API that runs decision versions, and the
//! account provisioning API that mints per-tenant eventing credentials.
//! Both are traits so the orchestrator can be exercised without a live
//! platform.

mod deploy;
mod vault;

pub use deploy::{DeployClient, DeployRequest, HttpDeployClient};
pub use vault::{AccountProvisioner, CredentialVault, HttpAccountProvisioner, MemoryVault};

#[cfg(test)]
pub use deploy::MockDeployClient;
#[cfg(test)]
pub use vault::MockAccountProvisioner;
