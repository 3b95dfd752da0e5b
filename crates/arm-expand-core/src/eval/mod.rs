//! Template evaluation: values, contexts, the function library and the
//! deployment visitor that drives an expansion.

pub mod builtins;
pub mod cidr;
pub mod compiler;
pub mod context;
pub mod copy;
pub mod deployment;
pub mod format;
pub mod graph;
pub mod json;
pub mod mock;
pub mod parameters;
pub mod projection;
pub mod providers;
pub mod registry;
pub mod resource;
pub mod validate;
pub mod value;
pub mod visitor;
