//! The DNS wire format: message, header, question, and resource
//! record types, plus serialisation to and deserialisation from
//! octets.
//!
//! See RFC 1035 section 4 for the format this module implements.

pub mod deserialise;
pub mod serialise;
pub mod types;
