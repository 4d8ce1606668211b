//! Native datastore backends. Each backend supplies a [`Backend`] factory
//! producing per-entity stores that speak the native data model: item tables
//! with scan filters, hash/set keyspaces with secondary indexes, or object
//! regions with a compiled query language.
//!
//! [`Backend`]: crate::session::Backend

pub mod dynamo;
pub mod oql;
pub mod redis;
