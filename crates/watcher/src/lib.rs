//! Configuration and placeholder client wiring for the subscription watcher
//! binary. The pipeline logic itself lives in the `pipeline` crate; this
//! crate is only the entrypoint's ambient concerns (§4.11).

pub mod clients;
pub mod config;
