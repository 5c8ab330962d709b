pub mod db;
pub mod firewall;
pub mod remote;
pub mod server;
pub mod web;
