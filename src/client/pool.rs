/*
 * Copyright 2024 Ben Ashford
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

//! A bounded pool of `Connection`s shared between tasks.
//!
//! Connections are dialled lazily, only when a borrow finds nothing idle and fewer than
//! `max_active` connections are lent out.  Every connection lent out holds one permit of a fair
//! semaphore, so tasks waiting for a connection are served in the order they started waiting,
//! and a waiter that gives up (its future is dropped) simply leaves the queue.
//!
//! The counters are only changed while holding the state lock, and each change is published
//! as a single atomic word, so `stats` never blocks and never sees half of an update.  A
//! returned slot's permit is released under the same lock, before the counters are published,
//! so once `stats` shows room for another borrower `try_get` finds it.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio_util::sync::CancellationToken;

use super::{connection::Connection, pipeline::Pipeline, script::Script};

use crate::{config::Config, error::Error, protocol::RespValue, task};

/// A snapshot of the pool's counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Connections currently lent out, including those being dialled for a borrower
    pub active: usize,
    /// Open connections waiting to be lent out
    pub idle: usize,
}

impl PoolStats {
    fn pack(self) -> u64 {
        ((self.active as u64) << 32) | (self.idle as u64 & 0xffff_ffff)
    }

    fn unpack(word: u64) -> Self {
        PoolStats {
            active: (word >> 32) as usize,
            idle: (word & 0xffff_ffff) as usize,
        }
    }
}

struct IdleConnection {
    connection: Connection,
    since: Instant,
}

struct PoolState {
    /// Most recently returned first
    idle: VecDeque<IdleConnection>,
    active: usize,
    closed: bool,
}

struct PoolInner {
    config: Arc<Config>,
    slots: Arc<Semaphore>,
    state: Mutex<PoolState>,
    stats: AtomicU64,
}

impl PoolInner {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        // The state is consistent between statements, so a panic elsewhere cannot corrupt it
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &PoolState) {
        let stats = PoolStats {
            active: state.active,
            idle: state.idle.len(),
        };
        self.stats.store(stats.pack(), Ordering::Release);
    }

    fn is_stale(&self, idle: &IdleConnection, now: Instant) -> bool {
        let config = &self.config;
        let idle_too_long =
            !config.idle_timeout.is_zero() && now.duration_since(idle.since) > config.idle_timeout;
        let too_old = !config.max_lifetime.is_zero()
            && now.duration_since(idle.connection.created()) > config.max_lifetime;
        idle_too_long || too_old
    }

    /// Removes idle connections past their idle timeout or lifetime, returning them so they can
    /// be dropped after the lock is released
    fn prune(&self, state: &mut PoolState) -> Vec<IdleConnection> {
        let now = Instant::now();
        let mut stale = Vec::new();
        let mut kept = VecDeque::with_capacity(state.idle.len());
        for idle in state.idle.drain(..) {
            if self.is_stale(&idle, now) {
                stale.push(idle);
            } else {
                kept.push_back(idle);
            }
        }
        state.idle = kept;
        if !stale.is_empty() {
            log::debug!("Evicting {} stale idle connection(s)", stale.len());
        }
        stale
    }

    /// Takes a slot for a borrower holding `permit`
    fn reserve(self: &Arc<Self>, permit: OwnedSemaphorePermit) -> Result<Slot, Error> {
        let mut state = self.lock();
        if state.closed {
            return Err(Error::PoolClosed);
        }
        state.active += 1;
        self.publish(&state);
        Ok(Slot {
            pool: self.clone(),
            permit: Some(permit),
        })
    }

    fn pop_idle(&self) -> Option<IdleConnection> {
        let (candidate, _stale) = {
            let mut state = self.lock();
            let stale = self.prune(&mut state);
            let candidate = state.idle.pop_front();
            self.publish(&state);
            (candidate, stale)
        };
        candidate
    }

    /// Gives back the slot of a borrower, and the connection if there is one
    fn release(&self, connection: Option<Connection>, permit: OwnedSemaphorePermit) {
        let (_discarded, _stale) = {
            let mut state = self.lock();
            state.active = state.active.saturating_sub(1);
            let discarded = match connection {
                Some(connection) if state.closed => Some(connection),
                Some(connection) if !connection.is_reusable() => {
                    log::debug!("Discarding a broken connection");
                    Some(connection)
                }
                Some(connection) if state.idle.len() < self.config.max_idle => {
                    state.idle.push_front(IdleConnection {
                        connection,
                        since: Instant::now(),
                    });
                    None
                }
                other => other,
            };
            let stale = self.prune(&mut state);
            // A borrower taking this permit blocks on the lock before counting itself active
            drop(permit);
            self.publish(&state);
            (discarded, stale)
        };
    }

    /// Idle connections that have not been used for a while are checked with a `PING` first
    async fn check(&self, idle: IdleConnection) -> Option<Connection> {
        let IdleConnection {
            mut connection,
            since,
        } = idle;
        let ping_after = self.config.ping_on_borrow;
        if ping_after.is_zero() || since.elapsed() < ping_after {
            return Some(connection);
        }
        match connection.send::<RespValue>(resp_array!["PING"]).await {
            Ok(_) => Some(connection),
            Err(e) => {
                log::debug!("Idle connection failed its liveness check: {}", e);
                None
            }
        }
    }
}

/// A slot counted as active, released on drop unless it was turned into a `PooledConnection`.
/// This is what keeps the counters exact when a borrow is abandoned half way.
struct Slot {
    pool: Arc<PoolInner>,
    permit: Option<OwnedSemaphorePermit>,
}

impl Slot {
    fn lend(mut self, connection: Connection) -> PooledConnection {
        PooledConnection {
            pool: self.pool.clone(),
            connection: Some(connection),
            permit: self.permit.take(),
        }
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        if let Some(permit) = self.permit.take() {
            self.pool.release(None, permit);
        }
    }
}

/// A shareable and cheaply cloneable handle to a pool of connections
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("address", &self.inner.config.address())
            .field("stats", &self.stats())
            .finish()
    }
}

impl Pool {
    /// Creates an empty pool, no connection is made until the first borrow
    pub fn new(config: Config) -> Result<Pool, Error> {
        config.validate()?;
        Ok(Pool::from_config(Arc::new(config)))
    }

    pub(crate) fn from_config(config: Arc<Config>) -> Pool {
        let state = PoolState {
            idle: VecDeque::with_capacity(config.max_idle),
            active: 0,
            closed: false,
        };
        Pool {
            inner: Arc::new(PoolInner {
                slots: Arc::new(Semaphore::new(config.max_active)),
                config,
                state: Mutex::new(state),
                stats: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Borrows a connection without waiting for one to be returned.
    ///
    /// Fails with `Error::PoolExhausted` straight away if `max_active` connections are lent
    /// out.  Dialling a new connection still involves IO, hence this being `async`.
    pub async fn try_get(&self) -> Result<PooledConnection, Error> {
        let permit = match self.inner.slots.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(TryAcquireError::NoPermits) => return Err(Error::PoolExhausted),
            Err(TryAcquireError::Closed) => return Err(Error::PoolClosed),
        };
        self.checkout(permit).await
    }

    /// Borrows a connection, waiting for one to be returned if the pool is exhausted.
    ///
    /// Waiters are served first come, first served.  Dropping the returned future (e.g. with
    /// `tokio::select!` or `tokio::time::timeout`) cancels the borrow and leaves the pool as it
    /// was.
    pub async fn get(&self) -> Result<PooledConnection, Error> {
        let permit = self
            .inner
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::PoolClosed)?;
        self.checkout(permit).await
    }

    /// As `get`, but gives up with `Error::Timeout` after `timeout`
    pub async fn get_timeout(&self, timeout: Duration) -> Result<PooledConnection, Error> {
        task::deadline(timeout, self.get()).await
    }

    /// As `get`, but gives up with `Error::Cancelled` as soon as `token` is cancelled
    pub async fn get_cancellable(
        &self,
        token: &CancellationToken,
    ) -> Result<PooledConnection, Error> {
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(Error::Cancelled),
            result = self.get() => result,
        }
    }

    async fn checkout(&self, permit: OwnedSemaphorePermit) -> Result<PooledConnection, Error> {
        let slot = self.inner.reserve(permit)?;
        while let Some(idle) = self.inner.pop_idle() {
            if let Some(connection) = self.inner.check(idle).await {
                return Ok(slot.lend(connection));
            }
        }
        let connection = Connection::open(&self.inner.config).await?;
        Ok(slot.lend(connection))
    }

    /// A consistent snapshot of the counters, readable without taking any lock
    pub fn stats(&self) -> PoolStats {
        PoolStats::unpack(self.inner.stats.load(Ordering::Acquire))
    }

    /// Closes every idle connection and stops lending.  Connections currently lent out are
    /// closed when they are returned, tasks waiting to borrow fail with `Error::PoolClosed`.
    /// Closing twice has no further effect.
    pub fn close(&self) {
        self.inner.slots.close();
        let drained: Vec<IdleConnection> = {
            let mut state = self.inner.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            let drained = state.idle.drain(..).collect();
            self.inner.publish(&state);
            drained
        };
        log::debug!(
            "Pool for {} closed, {} idle connection(s) dropped",
            self.inner.config.address(),
            drained.len()
        );
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// A new, empty, pipeline.  No IO happens until it is executed.
    pub fn pipeline(&self) -> Pipeline {
        Pipeline::new(self.clone())
    }

    /// A script with `key_count` keys, no IO happens until it is loaded or run
    pub fn script(&self, key_count: usize, source: impl Into<Arc<str>>) -> Script {
        Script::new(self.clone(), key_count, source)
    }
}

/// A connection borrowed from a `Pool`, it is given back when dropped.
///
/// A connection that is broken, or that still owes replies, is closed instead of being made
/// idle.
pub struct PooledConnection {
    pool: Arc<PoolInner>,
    connection: Option<Connection>,
    permit: Option<OwnedSemaphorePermit>,
}

impl PooledConnection {
    /// Takes the connection away from the pool for good, freeing its slot
    pub fn detach(mut self) -> Connection {
        match self.connection.take() {
            Some(connection) => connection,
            None => unreachable!("connection taken before drop"),
        }
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("connection", &self.connection)
            .finish()
    }
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.connection
            .as_ref()
            .expect("connection present until dropped")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.connection
            .as_mut()
            .expect("connection present until dropped")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(permit) = self.permit.take() {
            self.pool.release(self.connection.take(), permit);
        }
    }
}
