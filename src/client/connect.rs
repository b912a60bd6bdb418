/*
 * Copyright 2017-2024 Ben Ashford
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;
use tokio_util::codec::{Decoder, Framed};

use crate::{
    config::{Config, Driver},
    error::{self, Error},
    protocol::{FromResp, RespCodec},
    task,
};

/// The byte stream underneath a connection, one variant per `Driver`
#[derive(Debug)]
pub(crate) enum Transport {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl AsyncRead for Transport {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            #[cfg(unix)]
            Transport::Unix(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Transport {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Transport::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            #[cfg(unix)]
            Transport::Unix(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Tcp(stream) => Pin::new(stream).poll_flush(cx),
            #[cfg(unix)]
            Transport::Unix(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            #[cfg(unix)]
            Transport::Unix(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

pub(crate) type RespConnection = Framed<Transport, RespCodec>;

fn configure_tcp(stream: &TcpStream, config: &Config) -> io::Result<()> {
    stream.set_nodelay(true)?;
    if !config.keepalive.is_zero() {
        let keepalive = socket2::TcpKeepalive::new().with_time(config.keepalive);
        socket2::SockRef::from(stream).set_tcp_keepalive(&keepalive)?;
    }
    Ok(())
}

async fn dial(config: &Config) -> Result<Transport, Error> {
    match config.driver {
        Driver::Tcp => {
            let stream = TcpStream::connect((config.host.as_str(), config.port)).await?;
            configure_tcp(&stream, config)?;
            Ok(Transport::Tcp(stream))
        }
        #[cfg(unix)]
        Driver::Unix => Ok(Transport::Unix(UnixStream::connect(&config.host).await?)),
        #[cfg(not(unix))]
        Driver::Unix => Err(error::config(
            "the unix driver is not available on this platform",
        )),
    }
}

/// Sends one handshake command and waits for an `OK`
async fn handshake_step(
    connection: &mut RespConnection,
    command: crate::protocol::RespValue,
) -> Result<(), Error> {
    connection.send(command).await?;
    match connection.next().await {
        Some(Ok(value)) => <()>::from_resp(value),
        Some(Err(e)) => Err(e),
        None => Err(error::internal(
            "Connection closed before the handshake completed",
        )),
    }
}

/// Connect to the server named by `config`, authenticate and select the configured database.
///
/// The whole sequence is bounded by `connect_timeout`. Any failure, including a rejected
/// password, is fatal for the connection and nothing is returned.
pub(crate) async fn connect_with_auth(config: &Config) -> Result<RespConnection, Error> {
    let handshake = async {
        let transport = dial(config).await?;
        let mut connection = RespCodec.framed(transport);

        if let Some(password) = &config.password {
            let mut auth = resp_array!["AUTH"];
            if let Some(username) = &config.username {
                auth.push(username);
            }
            auth.push(password);
            handshake_step(&mut connection, auth).await?;
        }

        if config.database != 0 {
            handshake_step(&mut connection, resp_array!["SELECT", config.database]).await?;
        }

        Ok::<_, Error>(connection)
    };

    match task::timeout(config.connect_timeout, handshake).await {
        Some(result) => {
            if let Err(e) = &result {
                log::warn!("Cannot connect to {}: {}", config.address(), e);
            }
            result
        }
        None => {
            log::warn!("Timed out connecting to {}", config.address());
            Err(Error::IO(io::Error::new(
                io::ErrorKind::TimedOut,
                "connect timed out",
            )))
        }
    }
}
