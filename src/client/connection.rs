/*
 * Copyright 2024 Ben Ashford
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

use std::io;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};

use super::connect::{connect_with_auth, RespConnection};

use crate::{
    config::Config,
    error::{self, Error},
    protocol::{FromResp, RespValue},
    task,
};

/// A single link to the server, executing one command at a time.
///
/// A `Connection` is owned by exactly one user. Once an operation fails at the transport level
/// the connection is broken: every later operation fails with the same reason, and a pool will
/// close it instead of lending it out again.
#[derive(Debug)]
pub struct Connection {
    framed: RespConnection,
    read_timeout: Duration,
    write_timeout: Duration,
    /// Sticky reason the connection can no longer be used
    broken: Option<String>,
    /// Commands written whose replies have not been read yet
    pending: usize,
    created: Instant,
}

impl Connection {
    pub(crate) async fn open(config: &Config) -> Result<Self, Error> {
        let framed = connect_with_auth(config).await?;
        log::debug!("Connected to {}", config.address());
        Ok(Connection {
            framed,
            read_timeout: config.read_timeout,
            write_timeout: config.write_timeout,
            broken: None,
            pending: 0,
            created: Instant::now(),
        })
    }

    /// Sends a command and waits for its reply.
    ///
    /// The message must be in the format of a single RESP array, this can be constructed
    /// manually or with the `resp_array!` macro.  The type must be one for which the
    /// `protocol::FromResp` trait is defined.
    ///
    /// An error reply from the server (e.g. `WRONGTYPE`) is returned as `Error::Remote` and
    /// leaves the connection usable; IO and parsing failures break it.
    pub async fn send<T>(&mut self, msg: RespValue) -> Result<T, Error>
    where
        T: FromResp,
    {
        self.feed(msg).await?;
        self.flush().await?;
        let reply = self.receive().await?;
        T::from_resp(reply)
    }

    /// Buffers a command to be written, without flushing and without waiting for its reply.
    /// Each fed command owes one call to `receive`.
    pub async fn feed(&mut self, msg: RespValue) -> Result<(), Error> {
        if !matches!(msg, RespValue::Array(_)) {
            return Err(error::internal("Command must be a RespValue::Array"));
        }
        self.check()?;
        self.pending += 1;
        match task::timeout(self.write_timeout, self.framed.feed(msg)).await {
            Some(Ok(())) => Ok(()),
            Some(Err(e)) => Err(self.fail(e.into())),
            None => Err(self.fail(timed_out("write timed out"))),
        }
    }

    /// Writes every buffered command to the server
    pub async fn flush(&mut self) -> Result<(), Error> {
        self.check()?;
        let flush = SinkExt::<RespValue>::flush(&mut self.framed);
        match task::timeout(self.write_timeout, flush).await {
            Some(Ok(())) => Ok(()),
            Some(Err(e)) => Err(self.fail(e.into())),
            None => Err(self.fail(timed_out("flush timed out"))),
        }
    }

    /// Reads the next reply, in the order commands were sent. Error replies are returned as
    /// `RespValue::Error` rather than `Err`.
    pub async fn receive(&mut self) -> Result<RespValue, Error> {
        match self.read_frame(self.read_timeout).await? {
            Some(value) => Ok(value),
            None => Err(self.fail(timed_out("read timed out"))),
        }
    }

    /// Reads the next frame, waiting no longer than `limit` (zero waits forever). `Ok(None)`
    /// means the limit passed; that alone does not break the connection.
    pub(crate) async fn read_frame(&mut self, limit: Duration) -> Result<Option<RespValue>, Error> {
        self.check()?;
        match task::timeout(limit, self.framed.next()).await {
            Some(Some(Ok(value))) => {
                self.pending = self.pending.saturating_sub(1);
                Ok(Some(value))
            }
            Some(Some(Err(e))) => Err(self.fail(e)),
            Some(None) => Err(self.fail(Error::EndOfStream)),
            None => Ok(None),
        }
    }

    /// The reason this connection is broken, if it is
    pub fn error(&self) -> Option<Error> {
        self.broken.as_ref().map(|reason| error::broken(reason.clone()))
    }

    pub fn is_broken(&self) -> bool {
        self.broken.is_some()
    }

    /// Only a healthy connection with no replies outstanding can be handed to somebody else,
    /// otherwise the next user would read replies to commands they never sent.
    pub(crate) fn is_reusable(&self) -> bool {
        self.broken.is_none() && self.pending == 0
    }

    pub(crate) fn created(&self) -> Instant {
        self.created
    }

    pub(crate) fn mark_broken(&mut self, reason: impl Into<String>) {
        if self.broken.is_none() {
            self.broken = Some(reason.into());
        }
    }

    /// Shuts the link down. Pending replies are discarded.
    pub async fn close(mut self) -> Result<(), Error> {
        self.mark_broken("closed");
        SinkExt::<RespValue>::close(&mut self.framed).await?;
        Ok(())
    }

    fn check(&self) -> Result<(), Error> {
        match self.error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Records transport failures as the sticky broken state, and passes the error back
    fn fail(&mut self, err: Error) -> Error {
        if err.is_transport() {
            log::debug!("Connection broken: {}", err);
            self.mark_broken(err.to_string());
        }
        err
    }
}

fn timed_out(msg: &'static str) -> Error {
    Error::IO(io::Error::new(io::ErrorKind::TimedOut, msg))
}
