/*
 * Copyright 2020-2024 Ben Ashford
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

use bytes::{BufMut, BytesMut};

use crate::protocol::resp::RespValue;

fn write_line(symb: u8, line: &[u8], buf: &mut BytesMut) {
    buf.reserve(line.len() + 3);
    buf.put_u8(symb);
    buf.put_slice(line);
    buf.put_slice(b"\r\n");
}

fn write_header(symb: u8, len: i64, buf: &mut BytesMut) {
    write_line(symb, len.to_string().as_bytes(), buf);
}

/// Serialises a value onto the end of `buf`.  Only arrays of bulk strings are meaningful as
/// commands, the other variants exist so the same codec can play the server side in tests.
pub(crate) fn encode(msg: &RespValue, buf: &mut BytesMut) {
    match msg {
        RespValue::Nil => write_header(b'$', -1, buf),
        RespValue::Array(ary) => {
            write_header(b'*', ary.len() as i64, buf);
            for v in ary {
                encode(v, buf);
            }
        }
        RespValue::BulkString(bstr) => {
            write_header(b'$', bstr.len() as i64, buf);
            buf.reserve(bstr.len() + 2);
            buf.put_slice(bstr);
            buf.put_slice(b"\r\n");
        }
        RespValue::Error(string) => write_line(b'-', string.as_bytes(), buf),
        RespValue::Integer(val) => write_header(b':', *val, buf),
        RespValue::SimpleString(string) => write_line(b'+', string.as_bytes(), buf),
    }
}
