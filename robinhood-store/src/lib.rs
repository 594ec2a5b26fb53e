//! The source/enrich/sink assembly that turns `robinhood-core`'s backend
//! framework into a runnable tool: a YAML and a Lustre-changelog fsevent
//! source, an enricher pipeline, a MongoDB sink, and the undelete tool.

pub mod config;
pub mod enrich_pipeline;
pub mod mongo;
pub mod source;
pub mod undelete;
