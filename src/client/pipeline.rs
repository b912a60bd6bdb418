/*
 * Copyright 2024 Ben Ashford
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

use std::mem;
use std::slice;
use std::time::Duration;
use std::vec;

use super::pool::Pool;

use crate::{
    error::{self, Error},
    protocol::{FromResp, RespValue},
    task,
};

/// A batch of commands written to one connection in a single round trip.
///
/// Commands are queued with `send` and written together by `exec`, which returns one reply
/// per command in the order the commands were queued.
#[derive(Debug)]
pub struct Pipeline {
    pool: Pool,
    commands: Vec<RespValue>,
}

impl Pipeline {
    pub(crate) fn new(pool: Pool) -> Self {
        Pipeline {
            pool,
            commands: Vec::new(),
        }
    }

    /// Queues a command, no IO happens until `exec`
    pub fn send(&mut self, msg: RespValue) -> &mut Self {
        self.commands.push(msg);
        self
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Borrows a connection, writes every queued command, then reads exactly one reply for each.
    ///
    /// The queue is emptied whatever the outcome.  If no connection can be borrowed, or
    /// writing fails, the whole pipeline fails and no replies are returned.  Once everything is
    /// written each reply stands alone, so an error reply to one command does not affect the
    /// others.  An empty pipeline succeeds without borrowing a connection.
    ///
    /// Dropping the returned future (e.g. via `tokio::time::timeout` or `tokio::select!`)
    /// cancels the pipeline; a connection abandoned part way is closed rather than returned to
    /// the pool.  See also `exec_timeout`.
    pub async fn exec(&mut self) -> Result<Replies, Error> {
        let commands = mem::take(&mut self.commands);
        if commands.is_empty() {
            return Ok(Replies::default());
        }
        if !commands.iter().all(|c| matches!(c, RespValue::Array(_))) {
            return Err(error::internal("Command must be a RespValue::Array"));
        }

        let count = commands.len();
        let mut connection = self.pool.get().await?;
        for command in commands {
            connection.feed(command).await?;
        }
        connection.flush().await?;

        let mut replies = Vec::with_capacity(count);
        for _ in 0..count {
            // After a failed read the connection is broken, and the rest are reported as such
            let reply = match connection.error() {
                Some(err) => Err(err),
                None => connection.receive().await.and_then(RespValue::into_result),
            };
            replies.push(reply);
        }
        Ok(Replies { replies })
    }

    /// As `exec`, but gives up with `Error::Timeout` if borrowing, writing and reading have not
    /// all finished within `timeout`.  The queue is emptied either way.
    pub async fn exec_timeout(&mut self, timeout: Duration) -> Result<Replies, Error> {
        task::deadline(timeout, self.exec()).await
    }
}

/// The replies to a `Pipeline`, in the order the commands were sent
#[derive(Debug, Default)]
pub struct Replies {
    replies: Vec<Result<RespValue, Error>>,
}

impl Replies {
    pub fn len(&self) -> usize {
        self.replies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replies.is_empty()
    }

    /// The reply to the command at `idx`, `Err` if that command failed
    pub fn get(&self, idx: usize) -> Option<&Result<RespValue, Error>> {
        self.replies.get(idx)
    }

    /// True if every command succeeded
    pub fn all_ok(&self) -> bool {
        self.replies.iter().all(Result::is_ok)
    }

    pub fn iter(&self) -> slice::Iter<'_, Result<RespValue, Error>> {
        self.replies.iter()
    }

    /// Converts every reply to `T`
    pub fn values<T: FromResp>(self) -> Vec<Result<T, Error>> {
        self.replies
            .into_iter()
            .map(|reply| reply.and_then(T::from_resp))
            .collect()
    }
}

impl IntoIterator for Replies {
    type Item = Result<RespValue, Error>;
    type IntoIter = vec::IntoIter<Result<RespValue, Error>>;

    fn into_iter(self) -> Self::IntoIter {
        self.replies.into_iter()
    }
}
