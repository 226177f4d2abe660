//! Engine subsystems, leaf-first: records, graph, readiness, claims, team
//! resolution and structural validation.

pub mod claim;
pub mod graph;
pub mod issues;
pub mod ready;
pub mod snapshot;
pub mod team;
pub mod validate;
