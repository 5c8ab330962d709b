pub mod acl_service;
pub mod metrics_service;
pub mod node_service;
pub mod settings_service;
pub mod wallet_service;
