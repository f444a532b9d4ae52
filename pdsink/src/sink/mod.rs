//! The sink implementation: policy engine and device policy manager.
pub mod device_policy_manager;
pub mod policy_engine;
