/*
 * Copyright 2017-2024 Ben Ashford
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

//! Error handling

use std::{error, fmt, io};

use crate::protocol::RespValue;

#[derive(Debug)]
pub enum Error {
    /// A non-specific internal error that prevented an operation from completing
    Internal(String),

    /// An IO error occurred
    IO(io::Error),

    /// A RESP parsing/serialising error occurred
    RESP(String, Option<RespValue>),

    /// A remote error, returned by the server as a reply to a command. The connection that
    /// received it is still usable.
    Remote(String),

    /// Error with a connection that has been broken or closed
    Connection(ConnectionReason),

    /// The configuration is invalid; this is never recoverable by retrying
    Config(String),

    /// A non-waiting borrow found every connection slot in use
    PoolExhausted,

    /// The pool has been closed, it will not lend any more connections
    PoolClosed,

    /// A waiting operation did not complete before its deadline
    Timeout,

    /// A waiting operation was cancelled by its caller
    Cancelled,

    /// The connection was closed by the remote end
    EndOfStream,

    /// An unexpected error.  In this context "unexpected" means
    /// "unexpected because we check ahead of time", it used to maintain the type signature of
    /// chains of futures; but it occurring at runtime should be considered a catastrophic
    /// failure.
    ///
    /// If any error is propagated this way that needs to be handled, then it should be made into
    /// a proper option.
    Unexpected(String),
}

pub(crate) fn internal(msg: impl Into<String>) -> Error {
    Error::Internal(msg.into())
}

pub(crate) fn unexpected(msg: impl Into<String>) -> Error {
    Error::Unexpected(msg.into())
}

pub(crate) fn resp(msg: impl Into<String>, resp: RespValue) -> Error {
    Error::RESP(msg.into(), Some(resp))
}

pub(crate) fn config(msg: impl Into<String>) -> Error {
    Error::Config(msg.into())
}

pub(crate) fn broken(reason: impl Into<String>) -> Error {
    Error::Connection(ConnectionReason::Broken(reason.into()))
}

impl Error {
    /// True if the error was caused by the link to the server itself, rather than a reply from
    /// the server. A connection that produced such an error cannot be used again.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::IO(_) | Error::RESP(_, None) | Error::Connection(_) | Error::EndOfStream
        )
    }

    /// True if the server did not recognise the hash of a script, and the script needs to be
    /// loaded before it can be invoked by hash.
    pub fn is_no_script(&self) -> bool {
        match self {
            Error::Remote(msg) => msg.starts_with("NOSCRIPT"),
            _ => false,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::IO(err)
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::IO(err) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Internal(s) => f.write_str(s),
            Error::IO(err) => fmt::Display::fmt(err, f),
            Error::RESP(s, _) => f.write_str(s),
            Error::Remote(s) => f.write_str(s),
            Error::Connection(ConnectionReason::Broken(reason)) => {
                write!(f, "Connection is broken: {}", reason)
            }
            Error::Connection(ConnectionReason::Closed) => {
                f.write_str("Connection has been closed")
            }
            Error::Config(s) => write!(f, "Invalid configuration: {}", s),
            Error::PoolExhausted => f.write_str("Connection pool exhausted"),
            Error::PoolClosed => f.write_str("Connection pool has been closed"),
            Error::Timeout => f.write_str("Timed out"),
            Error::Cancelled => f.write_str("Cancelled while waiting for a connection"),
            Error::EndOfStream => f.write_str("End of stream"),
            Error::Unexpected(err) => f.write_str(err),
        }
    }
}

/// Details of a `Connection` error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionReason {
    /// A previous operation failed at the transport level, the connection must not be reused
    Broken(String),
    /// The connection was closed deliberately
    Closed,
}
