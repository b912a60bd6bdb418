/*
 * Copyright 2017-2024 Ben Ashford
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

//! A pooled client for Redis using Tokio and Futures.
//!
//! Everything starts from a [`Config`](config/struct.Config.html), which is validated once and
//! never changes afterwards, and a [`Client`](client/struct.Client.html) built from it.
//!
//! ## Pooled connections
//!
//! [`Client::pool`](client/struct.Client.html#method.pool) returns the client's
//! [`Pool`](client/struct.Pool.html).  Connections are dialled lazily, up to `max_active` of them,
//! and lent out one caller at a time.  A borrowed connection goes back to the pool when it is
//! dropped, unless it is broken or still owes replies, in which case it is closed.
//!
//! Borrowing can fail straight away when every connection is in use (`try_get`), or wait for one,
//! with or without a deadline or a cancellation token (`get`, `get_timeout`, `get_cancellable`).
//! A cancelled wait leaves no trace in the pool.
//!
//! Messages are sent as [`protocol::RespValue`](protocol/enum.RespValue.html)s, usually built with
//! the `resp_array!` macro, and replies are converted into Rust types via the
//! [`protocol::FromResp`](protocol/trait.FromResp.html) trait.
//!
//! ## Pipelines and scripts
//!
//! A [`Pipeline`](client/struct.Pipeline.html) writes a batch of commands over one borrowed
//! connection and reads back one reply per command, in order.  A
//! [`Script`](client/struct.Script.html) is a Lua script addressed by the SHA-1 of its source.
//!
//! ## Dedicated connections
//!
//! PUBSUB and blocking commands (e.g. `BLPOP`) leave a connection in a state nobody else can
//! use, so they get connections of their own that are never pooled:
//! [`PubsubConnection`](client/pubsub/struct.PubsubConnection.html) and
//! [`BlockingConnection`](client/struct.BlockingConnection.html).

#[macro_use]
pub mod protocol;

pub mod client;
pub mod config;
pub mod error;

mod task;

#[cfg(test)]
mod testing;

pub use client::Client;
pub use config::Config;
pub use error::Error;
