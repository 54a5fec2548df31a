//! Thread and connection pooling primitives

mod connection;
mod worker;

pub use connection::{ConnectionPool, PooledConnection};
pub use worker::{Task, TaskGroup, WorkerPool};
