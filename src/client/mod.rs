/*
 * Copyright 2017-2024 Ben Ashford
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

//! The client API itself.
//!
//! [`Client`] is the entry point, built from a validated [`Config`](crate::config::Config).  It
//! owns one [`Pool`] and hands out the connection types that must not be pooled:
//!
//! * `Pool` lends connections for ordinary request/response commands, and builds
//! [`Pipeline`]s and [`Script`]s that borrow from it.
//! * [`PubsubConnection`] is used for Redis's PUBSUB functionality.
//! * [`BlockingConnection`] is used for commands like `BLPOP` that wait on the server.

mod blocking;
mod connect;
mod connection;
mod pipeline;
mod pool;
pub mod pubsub;
mod script;

use std::sync::Arc;

use crate::{config::Config, error::Error};

pub use self::blocking::BlockingConnection;
pub use self::connection::Connection;
pub use self::pipeline::{Pipeline, Replies};
pub use self::pool::{Pool, PoolStats, PooledConnection};
pub use self::pubsub::PubsubConnection;
pub use self::script::{script_hash, Script};

/// A client for one Redis server
#[derive(Debug, Clone)]
pub struct Client {
    config: Arc<Config>,
    pool: Pool,
}

impl Client {
    /// Validates `config` and creates the client.  No connection is made until one is needed.
    pub fn try_new(config: Config) -> Result<Client, Error> {
        config.validate()?;
        let config = Arc::new(config);
        Ok(Client {
            pool: Pool::from_config(config.clone()),
            config,
        })
    }

    /// Creates the client.
    ///
    /// # Panics
    ///
    /// If `config` is invalid.  A misconfigured client is a programming error, not something to
    /// run degraded with; use `try_new` to handle it instead.
    pub fn new(config: Config) -> Client {
        match Client::try_new(config) {
            Ok(client) => client,
            Err(e) => panic!("Invalid Redis configuration: {}", e),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Dials a dedicated connection for PUBSUB
    pub async fn pubsub(&self) -> Result<PubsubConnection, Error> {
        PubsubConnection::open(&self.config).await
    }

    /// Dials a dedicated connection for blocking commands
    pub async fn blocking_connection(&self) -> Result<BlockingConnection, Error> {
        BlockingConnection::open(&self.config).await
    }
}
