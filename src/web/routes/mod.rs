pub mod acl_routes;
pub mod node_routes;
pub mod settings_routes;
pub mod transfer_routes;
pub mod wallet_routes;
