/*
 * Copyright 2017-2024 Ben Ashford
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

//! The values carried by the RESP protocol, and conversions to and from them

use std::convert::TryFrom;
use std::str;
use std::sync::Arc;

use crate::error::{self, Error};

/// A single RESP value, this owns the data that is read/to-be written to Redis.
///
/// Commands are always sent as an `Array` of `BulkString`s, replies may be any variant.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum RespValue {
    Nil,

    /// Zero, one or more other `RespValue`s.
    Array(Vec<RespValue>),

    /// A bulk string.  In Redis terminology a string is a byte-array, so this is stored as a
    /// vector of `u8`s to allow clients to interpret the bytes as appropriate.
    BulkString(Vec<u8>),

    /// An error from the Redis server
    Error(String),

    /// Redis documentation defines an integer as being a signed 64-bit integer:
    /// https://redis.io/topics/protocol#resp-integers
    Integer(i64),

    SimpleString(String),
}

impl RespValue {
    /// Turns an error reply into an `Err`, any other reply is passed through
    pub(crate) fn into_result(self) -> Result<RespValue, Error> {
        match self {
            RespValue::Error(string) => Err(Error::Remote(string)),
            x => Ok(x),
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, RespValue::Nil)
    }

    /// Convenience function for building dynamic Redis commands with variable numbers of
    /// arguments, e.g. RPUSH
    ///
    /// This will panic if called for anything other than arrays
    pub fn append<T>(mut self, other: impl IntoIterator<Item = T>) -> Self
    where
        T: Into<RespValue>,
    {
        match self {
            RespValue::Array(ref mut vals) => vals.extend(other.into_iter().map(Into::into)),
            _ => panic!("Can only append to arrays"),
        }
        self
    }

    /// Push item to Resp array
    ///
    /// This will panic if called for anything other than arrays
    pub fn push<T: Into<RespValue>>(&mut self, item: T) {
        match self {
            RespValue::Array(ref mut vals) => vals.push(item.into()),
            _ => panic!("Can only push to arrays"),
        }
    }

    /// The command name of a command array, used for logging
    pub(crate) fn command_name(&self) -> Option<String> {
        match self {
            RespValue::Array(vals) => match vals.first() {
                Some(RespValue::BulkString(name)) => Some(String::from_utf8_lossy(name).into()),
                _ => None,
            },
            _ => None,
        }
    }
}

/// A trait to be implemented for every time which can be read from a RESP value.
///
/// Implementing this trait on a type means that type becomes a valid return type for calls such
/// as `send` on `client::Connection`
pub trait FromResp: Sized {
    /// Return a `Result` containing either `Self` or `Error`.  Errors can occur due to either: a)
    /// the particular `RespValue` being incompatible with the required type, or b) a remote
    /// Redis error occuring.
    fn from_resp(resp: RespValue) -> Result<Self, Error> {
        Self::from_resp_int(resp.into_result()?)
    }

    fn from_resp_int(resp: RespValue) -> Result<Self, Error>;
}

impl FromResp for RespValue {
    fn from_resp_int(resp: RespValue) -> Result<RespValue, Error> {
        Ok(resp)
    }
}

impl FromResp for String {
    fn from_resp_int(resp: RespValue) -> Result<String, Error> {
        match resp {
            RespValue::BulkString(ref bytes) => Ok(String::from_utf8_lossy(bytes).into_owned()),
            RespValue::SimpleString(string) => Ok(string),
            _ => Err(error::resp("Cannot convert into a string", resp)),
        }
    }
}

impl FromResp for Vec<u8> {
    fn from_resp_int(resp: RespValue) -> Result<Vec<u8>, Error> {
        match resp {
            RespValue::BulkString(bytes) => Ok(bytes),
            RespValue::SimpleString(string) => Ok(string.into_bytes()),
            _ => Err(error::resp("Not a bulk string", resp)),
        }
    }
}

impl FromResp for i64 {
    fn from_resp_int(resp: RespValue) -> Result<i64, Error> {
        match resp {
            RespValue::Integer(i) => Ok(i),
            _ => Err(error::resp("Cannot be converted into an i64", resp)),
        }
    }
}

macro_rules! impl_fromresp_integers {
    ($($int_ty:ident),* $(,)*) => {
        $(
            impl FromResp for $int_ty {
                fn from_resp_int(resp: RespValue) -> Result<Self, Error> {
                    let x = i64::from_resp_int(resp)?;
                    $int_ty::try_from(x).map_err(|_| {
                        error::resp(
                            concat!("i64 value cannot be represented as ", stringify!($int_ty)),
                            RespValue::Integer(x),
                        )
                    })
                }
            }
        )*
    };
}

impl_fromresp_integers!(isize, usize, i32, u32, u64);

impl FromResp for bool {
    fn from_resp_int(resp: RespValue) -> Result<bool, Error> {
        match i64::from_resp_int(resp)? {
            0 => Ok(false),
            1 => Ok(true),
            x => Err(error::resp(
                "i64 value cannot be represented as bool",
                RespValue::Integer(x),
            )),
        }
    }
}

impl<T: FromResp> FromResp for Option<T> {
    fn from_resp_int(resp: RespValue) -> Result<Option<T>, Error> {
        match resp {
            RespValue::Nil => Ok(None),
            x => Ok(Some(T::from_resp_int(x)?)),
        }
    }
}

impl<T: FromResp> FromResp for Vec<T> {
    fn from_resp_int(resp: RespValue) -> Result<Vec<T>, Error> {
        match resp {
            RespValue::Array(ary) => ary.into_iter().map(T::from_resp).collect(),
            _ => Err(error::resp("Cannot be converted into a vector", resp)),
        }
    }
}

impl FromResp for () {
    fn from_resp_int(resp: RespValue) -> Result<(), Error> {
        match resp {
            RespValue::SimpleString(ref string) if string == "OK" => Ok(()),
            _ => Err(error::resp("Expected OK", resp)),
        }
    }
}

/// Two element arrays, e.g. the `key, value` reply of `BLPOP`
impl<A, B> FromResp for (A, B)
where
    A: FromResp,
    B: FromResp,
{
    fn from_resp_int(resp: RespValue) -> Result<(A, B), Error> {
        match resp {
            RespValue::Array(ary) if ary.len() == 2 => {
                let mut ary_iter = ary.into_iter();
                match (ary_iter.next(), ary_iter.next()) {
                    (Some(a), Some(b)) => Ok((A::from_resp(a)?, B::from_resp(b)?)),
                    _ => Err(error::unexpected("Two element array lost an element")),
                }
            }
            RespValue::Array(ary) => Err(Error::RESP(
                format!("Array needs to be 2 elements, is: {}", ary.len()),
                Some(RespValue::Array(ary)),
            )),
            _ => Err(error::resp("Unexpected value", resp)),
        }
    }
}

/// Macro to create a RESP array, useful for preparing commands to send.  Elements can be any
/// type, or a mixture of types, that satisfy `Into<RespValue>`.
///
/// # Examples
///
/// ```
/// #[macro_use]
/// extern crate redis_lender;
///
/// fn main() {
///     let value = format!("something_{}", 123);
///     resp_array!["SET", "key_name", value];
/// }
/// ```
///
/// For variable length Redis commands:
///
/// ```
/// #[macro_use]
/// extern crate redis_lender;
///
/// fn main() {
///     let data = vec!["data", "from", "somewhere", "else"];
///     let command = resp_array!["RPUSH", "mykey"].append(data);
/// }
/// ```
#[macro_export]
macro_rules! resp_array {
    ($($e:expr),* $(,)?) => {
        {
            $crate::protocol::RespValue::Array(vec![
                $(
                    $e.into(),
                )*
            ])
        }
    }
}

macro_rules! bulk_string_from {
    ($($t:ty => $conv:expr),* $(,)*) => {
        $(
            impl<'a> From<$t> for RespValue {
                fn from(from: $t) -> RespValue {
                    RespValue::BulkString($conv(from))
                }
            }
        )*
    };
}

bulk_string_from!(
    String => String::into_bytes,
    &'a String => |s: &String| s.as_bytes().to_vec(),
    &'a str => |s: &str| s.as_bytes().to_vec(),
    &'a [u8] => <[u8]>::to_vec,
    Vec<u8> => |v| v,
    Arc<str> => |s: Arc<str>| s.as_bytes().to_vec(),
);

/// Numeric arguments are sent as their decimal representation, which is how Redis expects all
/// command arguments.
macro_rules! bulk_string_from_integers {
    ($($int_ty:ty),* $(,)*) => {
        $(
            impl From<$int_ty> for RespValue {
                fn from(from: $int_ty) -> RespValue {
                    RespValue::BulkString(from.to_string().into_bytes())
                }
            }
        )*
    };
}

bulk_string_from_integers!(i64, isize, i32, u32, u64, usize);
