/*
 * Copyright 2017-2024 Ben Ashford
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

mod event;

use std::time::Duration;

use futures_util::stream::{self, Stream};

use super::connection::Connection;

use crate::{
    config::Config,
    error::{ConnectionReason, Error},
    protocol::RespValue,
};

pub use self::event::{Event, Message, PatternMessage, Pong, Subscription, SubscriptionKind};

/// Used for Redis's PUBSUB functionality.
///
/// Owns a dedicated connection for its whole life.  Subscribing and unsubscribing only write
/// the request; the server's confirmations, published messages and pongs are all read, in
/// the order they arrive, with `receive`.
///
/// The subscriptions themselves live on the server.  If the connection is lost they are gone,
/// and a new `PubsubConnection` has to subscribe again.
#[derive(Debug)]
pub struct PubsubConnection {
    connection: Option<Connection>,
}

impl PubsubConnection {
    pub(crate) async fn open(config: &Config) -> Result<Self, Error> {
        Ok(PubsubConnection {
            connection: Some(Connection::open(config).await?),
        })
    }

    fn connection(&mut self) -> Result<&mut Connection, Error> {
        self.connection
            .as_mut()
            .ok_or(Error::Connection(ConnectionReason::Closed))
    }

    async fn write(&mut self, command: RespValue) -> Result<(), Error> {
        let connection = self.connection()?;
        connection.feed(command).await?;
        connection.flush().await
    }

    async fn request<I, T>(
        &mut self,
        name: &str,
        channels: I,
        all_if_empty: bool,
    ) -> Result<(), Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<RespValue>,
    {
        let command = resp_array![name].append(channels);
        match &command {
            RespValue::Array(parts) if parts.len() == 1 && !all_if_empty => Ok(()),
            _ => self.write(command).await,
        }
    }

    /// Subscribes to channels.  Each one is confirmed by an `Event::Subscription`.
    pub async fn subscribe<I, T>(&mut self, channels: I) -> Result<(), Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<RespValue>,
    {
        self.request("SUBSCRIBE", channels, false).await
    }

    /// Unsubscribes from channels, or from every channel if none are given
    pub async fn unsubscribe<I, T>(&mut self, channels: I) -> Result<(), Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<RespValue>,
    {
        self.request("UNSUBSCRIBE", channels, true).await
    }

    /// Subscribes to glob-style patterns
    pub async fn psubscribe<I, T>(&mut self, patterns: I) -> Result<(), Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<RespValue>,
    {
        self.request("PSUBSCRIBE", patterns, false).await
    }

    /// Unsubscribes from patterns, or from every pattern if none are given
    pub async fn punsubscribe<I, T>(&mut self, patterns: I) -> Result<(), Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<RespValue>,
    {
        self.request("PUNSUBSCRIBE", patterns, true).await
    }

    /// Asks the server for an `Event::Pong` carrying `data`, whether or not anything is
    /// subscribed
    pub async fn ping(&mut self, data: &str) -> Result<(), Error> {
        self.write(resp_array!["PING", data]).await
    }

    /// Waits, for as long as it takes, for the next event
    pub async fn receive(&mut self) -> Result<Event, Error> {
        match self.connection()?.read_frame(Duration::ZERO).await? {
            Some(frame) => Event::from_frame(frame),
            None => Err(crate::error::unexpected("Unbounded read gave up")),
        }
    }

    /// Waits up to `timeout` for the next event, `Ok(None)` if nothing arrived.  The connection
    /// remains usable after a timeout.
    pub async fn receive_timeout(&mut self, timeout: Duration) -> Result<Option<Event>, Error> {
        if timeout.is_zero() {
            return self.receive().await.map(Some);
        }
        match self.connection()?.read_frame(timeout).await? {
            Some(frame) => Event::from_frame(frame).map(Some),
            None => Ok(None),
        }
    }

    /// The events of this connection as a `Stream`.  The stream ends after the first error
    /// that breaks the connection.
    pub fn into_stream(self) -> impl Stream<Item = Result<Event, Error>> {
        stream::unfold(Some(self), |state| async move {
            let mut pubsub = state?;
            match pubsub.receive().await {
                Ok(event) => Some((Ok(event), Some(pubsub))),
                Err(e) if e.is_transport() => Some((Err(e), None)),
                Err(e) => Some((Err(e), Some(pubsub))),
            }
        })
    }

    /// Closes the connection.  Later calls fail with a closed connection error.
    pub async fn close(&mut self) -> Result<(), Error> {
        match self.connection.take() {
            Some(connection) => connection.close().await,
            None => Ok(()),
        }
    }
}
