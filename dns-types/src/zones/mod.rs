//! Authoritative zone data: records held locally rather than learned
//! from upstream nameservers, plus zone file (de)serialisation.

pub mod deserialise;
pub mod serialise;
pub mod types;
