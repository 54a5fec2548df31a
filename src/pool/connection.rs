//! Fixed set of client handles shared by concurrent tasks

use crate::error::{LagError, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::time::{Duration, Instant};

/// Blocking pool of pre-built connections
///
/// At most `size()` units of work hold a connection at any time; further
/// callers wait until one is returned.
pub struct ConnectionPool<C> {
    idle: Mutex<VecDeque<C>>,
    returned: Condvar,
    size: usize,
}

impl<C: Send> ConnectionPool<C> {
    /// Build a pool from already-connected handles
    pub fn new(connections: Vec<C>) -> Result<Self> {
        if connections.is_empty() {
            return Err(LagError::Config(
                "connection pool needs at least one connection".to_string(),
            ));
        }
        let size = connections.len();
        Ok(Self {
            idle: Mutex::new(connections.into()),
            returned: Condvar::new(),
            size,
        })
    }

    /// Total number of connections
    pub fn size(&self) -> usize {
        self.size
    }

    /// Connections currently not checked out
    pub fn available(&self) -> usize {
        self.idle.lock().len()
    }

    /// Block until a connection is free and take it
    pub fn checkout(&self) -> PooledConnection<'_, C> {
        let mut idle = self.idle.lock();
        loop {
            if let Some(connection) = idle.pop_front() {
                return PooledConnection {
                    pool: self,
                    connection: Some(connection),
                };
            }
            self.returned.wait(&mut idle);
        }
    }

    /// Like [`checkout`](Self::checkout), giving up after `timeout`
    pub fn checkout_timeout(&self, timeout: Duration) -> Option<PooledConnection<'_, C>> {
        let deadline = Instant::now() + timeout;
        let mut idle = self.idle.lock();
        loop {
            if let Some(connection) = idle.pop_front() {
                return Some(PooledConnection {
                    pool: self,
                    connection: Some(connection),
                });
            }
            if self.returned.wait_until(&mut idle, deadline).timed_out() && idle.is_empty() {
                return None;
            }
        }
    }

    /// Run `f` with exclusive use of a connection. The pool lock is not held
    /// while `f` runs, and the connection is returned even if `f` panics.
    pub fn with_connection<R>(&self, f: impl FnOnce(&mut C) -> R) -> R {
        let mut connection = self.checkout();
        f(&mut *connection)
    }

    /// Like [`with_connection`](Self::with_connection), failing with
    /// [`LagError::Timeout`] if no connection frees up within `timeout`
    pub fn with_connection_timeout<R>(
        &self,
        timeout: Duration,
        f: impl FnOnce(&mut C) -> R,
    ) -> Result<R> {
        let mut connection = self.checkout_timeout(timeout).ok_or_else(|| {
            LagError::Timeout(format!("no connection available after {:?}", timeout))
        })?;
        Ok(f(&mut *connection))
    }

    fn give_back(&self, connection: C) {
        self.idle.lock().push_back(connection);
        self.returned.notify_one();
    }
}

/// Connection checked out of a [`ConnectionPool`]; returned on drop
pub struct PooledConnection<'a, C: Send> {
    pool: &'a ConnectionPool<C>,
    connection: Option<C>,
}

impl<C: Send> Deref for PooledConnection<'_, C> {
    type Target = C;

    fn deref(&self) -> &C {
        // Only taken in drop.
        match self.connection.as_ref() {
            Some(connection) => connection,
            None => unreachable!("connection already returned"),
        }
    }
}

impl<C: Send> DerefMut for PooledConnection<'_, C> {
    fn deref_mut(&mut self) -> &mut C {
        match self.connection.as_mut() {
            Some(connection) => connection,
            None => unreachable!("connection already returned"),
        }
    }
}

impl<C: Send> Drop for PooledConnection<'_, C> {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            self.pool.give_back(connection);
        }
    }
}
