/*
 * Copyright 2020-2024 Ben Ashford
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

use std::str;

use crate::{error::Error, protocol::resp::RespValue};

/// `Ok(None)` means more bytes are needed, otherwise the position after the value is returned
/// alongside it.
type DecodeResult = Result<Option<(usize, RespValue)>, Error>;

#[inline]
fn parse_error(message: String) -> Error {
    Error::RESP(message, None)
}

/// Finds the next line starting at `idx`, returning the line without its terminator and the
/// position immediately after the terminating "\r\n".
fn next_line(buf: &[u8], idx: usize) -> Option<(usize, &[u8])> {
    let rest = buf.get(idx..)?;
    let end = rest.windows(2).position(|w| w == b"\r\n")?;
    Some((idx + end + 2, &rest[..end]))
}

fn parse_integer(line: &[u8]) -> Result<i64, Error> {
    let string = str::from_utf8(line)
        .map_err(|_| parse_error(format!("Not a valid string: {:?}", line)))?;
    string
        .parse()
        .map_err(|_| parse_error(format!("Not an integer: {}", string)))
}

/// Sizes of bulk strings and arrays, where `-1` is the RESP2 encoding of nil
fn decode_size(buf: &[u8], idx: usize) -> Result<Option<(usize, Option<usize>)>, Error> {
    let (pos, line) = match next_line(buf, idx) {
        Some(found) => found,
        None => return Ok(None),
    };
    match parse_integer(line)? {
        -1 => Ok(Some((pos, None))),
        size if size >= 0 => Ok(Some((pos, Some(size as usize)))),
        size => Err(parse_error(format!("Invalid size: {}", size))),
    }
}

fn decode_bulk_string(buf: &[u8], idx: usize) -> DecodeResult {
    let (pos, size) = match decode_size(buf, idx)? {
        Some((pos, Some(size))) => (pos, size),
        Some((pos, None)) => return Ok(Some((pos, RespValue::Nil))),
        None => return Ok(None),
    };
    let end = pos + size;
    if buf.len() < end + 2 {
        return Ok(None);
    }
    if &buf[end..end + 2] != b"\r\n" {
        return Err(parse_error(format!(
            "Bulk string of {} bytes is not terminated",
            size
        )));
    }
    Ok(Some((end + 2, RespValue::BulkString(buf[pos..end].to_vec()))))
}

fn decode_array(buf: &[u8], idx: usize) -> DecodeResult {
    let (mut pos, size) = match decode_size(buf, idx)? {
        Some((pos, Some(size))) => (pos, size),
        Some((pos, None)) => return Ok(Some((pos, RespValue::Nil))),
        None => return Ok(None),
    };
    let mut values = Vec::with_capacity(size.min(1024));
    for _ in 0..size {
        match decode(buf, pos)? {
            Some((next_pos, value)) => {
                values.push(value);
                pos = next_pos;
            }
            None => return Ok(None),
        }
    }
    Ok(Some((pos, RespValue::Array(values))))
}

fn decode_line<F>(buf: &[u8], idx: usize, f: F) -> DecodeResult
where
    F: FnOnce(&[u8]) -> Result<RespValue, Error>,
{
    match next_line(buf, idx) {
        Some((pos, line)) => Ok(Some((pos, f(line)?))),
        None => Ok(None),
    }
}

pub(crate) fn decode(buf: &[u8], idx: usize) -> DecodeResult {
    let first_byte = match buf.get(idx) {
        Some(b) => *b,
        None => return Ok(None),
    };
    match first_byte {
        b'$' => decode_bulk_string(buf, idx + 1),
        b'*' => decode_array(buf, idx + 1),
        b':' => decode_line(buf, idx + 1, |line| {
            parse_integer(line).map(RespValue::Integer)
        }),
        b'+' => decode_line(buf, idx + 1, |line| {
            Ok(RespValue::SimpleString(
                String::from_utf8_lossy(line).into_owned(),
            ))
        }),
        b'-' => decode_line(buf, idx + 1, |line| {
            Ok(RespValue::Error(String::from_utf8_lossy(line).into_owned()))
        }),
        _ => Err(parse_error(format!("Unexpected byte: {}", first_byte))),
    }
}
