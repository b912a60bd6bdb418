/*
 * Copyright 2017-2024 Ben Ashford
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

use std::fmt;

use crate::{
    error::{self, Error},
    protocol::{FromResp, RespValue},
};

/// A message published on a channel this connection subscribed to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub channel: String,
    pub data: Vec<u8>,
}

/// A message published on a channel matching a pattern this connection subscribed to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternMessage {
    pub pattern: String,
    pub channel: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionKind {
    Subscribe,
    Unsubscribe,
    PSubscribe,
    PUnsubscribe,
}

impl fmt::Display for SubscriptionKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            SubscriptionKind::Subscribe => "subscribe",
            SubscriptionKind::Unsubscribe => "unsubscribe",
            SubscriptionKind::PSubscribe => "psubscribe",
            SubscriptionKind::PUnsubscribe => "punsubscribe",
        })
    }
}

/// Confirmation that a channel or pattern was subscribed or unsubscribed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub kind: SubscriptionKind,
    /// Empty when unsubscribing from everything while subscribed to nothing
    pub channel: String,
    /// How many channels and patterns the connection is now subscribed to
    pub count: usize,
}

/// The answer to a `ping`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pong {
    pub data: String,
}

/// Anything that can arrive on a PUBSUB connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Message(Message),
    PMessage(PatternMessage),
    Subscription(Subscription),
    Pong(Pong),
}

fn string(value: RespValue) -> Result<String, Error> {
    match value {
        RespValue::Nil => Ok(String::new()),
        value => String::from_resp(value),
    }
}

fn subscription(
    kind: SubscriptionKind,
    channel: RespValue,
    count: RespValue,
) -> Result<Event, Error> {
    Ok(Event::Subscription(Subscription {
        kind,
        channel: string(channel)?,
        count: usize::from_resp(count)?,
    }))
}

impl Event {
    pub(crate) fn from_frame(frame: RespValue) -> Result<Event, Error> {
        let parts = match frame {
            RespValue::Array(parts) => parts,
            // Outside of subscribed mode PING is answered like any other command
            RespValue::SimpleString(status) if status == "PONG" => {
                return Ok(Event::Pong(Pong {
                    data: String::new(),
                }))
            }
            RespValue::BulkString(bytes) => {
                return Ok(Event::Pong(Pong {
                    data: String::from_utf8_lossy(&bytes).into_owned(),
                }))
            }
            RespValue::Error(msg) => return Err(Error::Remote(msg)),
            other => return Err(error::resp("Unexpected PUBSUB frame", other)),
        };

        let mut parts = parts.into_iter();
        let kind = match parts.next() {
            Some(kind) => String::from_resp(kind)?.to_ascii_lowercase(),
            None => return Err(error::unexpected("Empty PUBSUB frame")),
        };
        let event = match (kind.as_str(), parts.next(), parts.next(), parts.next(), parts.next()) {
            ("message", Some(channel), Some(data), None, None) => Event::Message(Message {
                channel: string(channel)?,
                data: Vec::<u8>::from_resp(data)?,
            }),
            ("pmessage", Some(pattern), Some(channel), Some(data), None) => {
                Event::PMessage(PatternMessage {
                    pattern: string(pattern)?,
                    channel: string(channel)?,
                    data: Vec::<u8>::from_resp(data)?,
                })
            }
            ("subscribe", Some(channel), Some(count), None, None) => {
                subscription(SubscriptionKind::Subscribe, channel, count)?
            }
            ("unsubscribe", Some(channel), Some(count), None, None) => {
                subscription(SubscriptionKind::Unsubscribe, channel, count)?
            }
            ("psubscribe", Some(channel), Some(count), None, None) => {
                subscription(SubscriptionKind::PSubscribe, channel, count)?
            }
            ("punsubscribe", Some(channel), Some(count), None, None) => {
                subscription(SubscriptionKind::PUnsubscribe, channel, count)?
            }
            ("pong", data, None, None, None) => Event::Pong(Pong {
                data: match data {
                    Some(data) => string(data)?,
                    None => String::new(),
                },
            }),
            (kind, ..) => {
                return Err(error::unexpected(format!(
                    "Incorrect format of a PUBSUB {} frame",
                    kind
                )))
            }
        };
        Ok(event)
    }
}
