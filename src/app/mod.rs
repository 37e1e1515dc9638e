//! Runtime pieces around the structure store: collaborators, the regeneration coordinator and
//! the service the transports call.

pub mod blob_store;
pub mod coordinator;
pub mod queue;
pub mod service;
