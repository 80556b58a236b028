pub mod address;
pub mod nameserver;
pub mod net;
pub mod types;
