//! The POSIX walker and the enricher chain that runs over its output and
//! over live fsevents alike (spec §4.4, §4.5).

pub mod enrich;
pub mod lustre;
pub mod posix;
pub mod retention;
pub mod sys;

pub use enrich::Enricher;
pub use posix::PosixWalker;
pub use sys::PosixOps;
