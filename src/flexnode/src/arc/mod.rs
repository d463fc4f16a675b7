//! Identity and access registration against the cloud control plane.

pub mod agent;
pub mod registration;
pub mod roles;

pub use agent::{parse_agent_show, AgentShow, ArcAgent, AzcmAgent, ConnectRequest};
pub use registration::{
    ArcDeregistrationStep, ArcRegistrationStep, RegistrationTarget, RegistrationTimings,
};
pub use roles::{assign_roles, remove_roles, required_roles, wait_for_permissions, RoleRequirement};
