/*
 * Copyright 2024 Ben Ashford
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

use std::time::Duration;

use super::connection::Connection;

use crate::{
    config::Config,
    error::Error,
    protocol::{FromResp, RespValue},
};

/// A connection of its own for commands that block on the server waiting for data, e.g. `BLPOP`.
///
/// Never part of a pool: a blocking call that gives up while the server is still holding the
/// command leaves a reply in flight, so the connection cannot be handed to anybody else.
#[derive(Debug)]
pub struct BlockingConnection {
    connection: Connection,
}

impl BlockingConnection {
    pub(crate) async fn open(config: &Config) -> Result<Self, Error> {
        Ok(BlockingConnection {
            connection: Connection::open(config).await?,
        })
    }

    /// Sends a command, waiting up to `timeout` for its reply instead of the configured read
    /// timeout.  A zero `timeout` waits as long as it takes.
    ///
    /// Returns `Ok(None)` both for a nil reply and when `timeout` passes without a reply; in the
    /// second case the connection is broken from then on.  Losing the link while waiting is an
    /// `Err`, the same as for any other command.
    pub async fn send_with_timeout<T>(
        &mut self,
        timeout: Duration,
        msg: RespValue,
    ) -> Result<Option<T>, Error>
    where
        T: FromResp,
    {
        let name = msg.command_name();
        self.connection.feed(msg).await?;
        self.connection.flush().await?;
        match self.connection.read_frame(timeout).await? {
            Some(reply) => Option::<T>::from_resp(reply),
            None => {
                let name = name.as_deref().unwrap_or("command");
                log::debug!("Blocking {} gave up after {:?}", name, timeout);
                self.connection
                    .mark_broken(format!("blocking {} timed out after {:?}", name, timeout));
                Ok(None)
            }
        }
    }

    /// Sends a command that is not expected to block, using the configured timeouts
    pub async fn send<T: FromResp>(&mut self, msg: RespValue) -> Result<T, Error> {
        self.connection.send(msg).await
    }

    pub fn error(&self) -> Option<Error> {
        self.connection.error()
    }

    pub fn is_broken(&self) -> bool {
        self.connection.is_broken()
    }

    pub async fn close(self) -> Result<(), Error> {
        self.connection.close().await
    }
}
