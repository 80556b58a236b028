//! `/etc/hosts`-style address lists, convertible to and from zones.

pub mod deserialise;
pub mod serialise;
pub mod types;
