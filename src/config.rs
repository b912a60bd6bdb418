/*
 * Copyright 2024 Ben Ashford
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

//! Network and pool parameters.
//!
//! A `Config` is built once, validated when the `Client` is created, and never changes
//! afterwards. A zero `Duration` switches the corresponding bound off.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{self, Error};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 6379;
pub const DEFAULT_DATABASE: u32 = 0;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(2 * 60);
pub const DEFAULT_MAX_ACTIVE: usize = 5;
pub const DEFAULT_MAX_IDLE: usize = 4;
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(3 * 60 * 60);
pub const DEFAULT_MAX_LIFETIME: Duration = Duration::from_secs(12 * 60 * 60);
pub const DEFAULT_PING_ON_BORROW: Duration = Duration::from_secs(2 * 60);

/// Redis ships with 16 logical databases
pub const MAX_DATABASE: u32 = 15;

/// How connections reach the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Driver {
    /// `host:port` over TCP
    #[default]
    Tcp,
    /// `host` is the path of a Unix domain socket, `port` is ignored
    Unix,
}

impl FromStr for Driver {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Driver::Tcp),
            "unix" => Ok(Driver::Unix),
            _ => Err(error::config(format!("unsupported driver [{}]", s))),
        }
    }
}

impl fmt::Display for Driver {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Driver::Tcp => f.write_str("tcp"),
            Driver::Unix => f.write_str("unix"),
        }
    }
}

#[derive(Clone)]
pub struct Config {
    pub driver: Driver,

    pub host: String,
    pub port: u16,
    /// Only sent with `AUTH` if a password is also set
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: u32,

    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    /// TCP keep-alive idle time
    pub keepalive: Duration,

    /// Upper bound on connections lent out (or being dialled) at once
    pub max_active: usize,
    /// Upper bound on connections kept open while nobody uses them
    pub max_idle: usize,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
    /// Idle connections older than this are sent a `PING` before being lent out
    pub ping_on_borrow: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            driver: Driver::default(),
            host: DEFAULT_HOST.to_owned(),
            port: DEFAULT_PORT,
            username: None,
            password: None,
            database: DEFAULT_DATABASE,
            connect_timeout: DEFAULT_TIMEOUT,
            read_timeout: DEFAULT_TIMEOUT,
            write_timeout: DEFAULT_TIMEOUT,
            keepalive: DEFAULT_KEEPALIVE,
            max_active: DEFAULT_MAX_ACTIVE,
            max_idle: DEFAULT_MAX_IDLE,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            max_lifetime: DEFAULT_MAX_LIFETIME,
            ping_on_borrow: DEFAULT_PING_ON_BORROW,
        }
    }
}

// Hand-written so the password never ends up in logs
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Config")
            .field("driver", &self.driver)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "******"))
            .field("database", &self.database)
            .field("connect_timeout", &self.connect_timeout)
            .field("read_timeout", &self.read_timeout)
            .field("write_timeout", &self.write_timeout)
            .field("keepalive", &self.keepalive)
            .field("max_active", &self.max_active)
            .field("max_idle", &self.max_idle)
            .field("idle_timeout", &self.idle_timeout)
            .field("max_lifetime", &self.max_lifetime)
            .field("ping_on_borrow", &self.ping_on_borrow)
            .finish()
    }
}

impl Config {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Config {
            host: host.into(),
            port,
            ..Config::default()
        }
    }

    pub fn with_driver(mut self, driver: Driver) -> Self {
        self.driver = driver;
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_database(mut self, database: u32) -> Self {
        self.database = database;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn with_keepalive(mut self, keepalive: Duration) -> Self {
        self.keepalive = keepalive;
        self
    }

    pub fn with_max_active(mut self, max_active: usize) -> Self {
        self.max_active = max_active;
        self
    }

    pub fn with_max_idle(mut self, max_idle: usize) -> Self {
        self.max_idle = max_idle;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_max_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_lifetime = lifetime;
        self
    }

    pub fn with_ping_on_borrow(mut self, after: Duration) -> Self {
        self.ping_on_borrow = after;
        self
    }

    /// Checks every invariant the pool and the dialer rely on. Nothing is clamped or corrected,
    /// the first violation is reported.
    pub fn validate(&self) -> Result<(), Error> {
        if self.host.is_empty() {
            return Err(error::config("host is empty"));
        }
        match self.driver {
            Driver::Tcp if self.port == 0 => return Err(error::config("port must not be 0")),
            Driver::Tcp => (),
            Driver::Unix if cfg!(unix) => (),
            Driver::Unix => {
                return Err(error::config(
                    "the unix driver is not available on this platform",
                ))
            }
        }
        if self.database > MAX_DATABASE {
            return Err(error::config(format!(
                "database {} is outside 0..={}",
                self.database, MAX_DATABASE
            )));
        }
        if self.max_active == 0 {
            return Err(error::config("max_active must be at least 1"));
        }
        if self.max_idle > self.max_active {
            return Err(error::config(format!(
                "max_idle ({}) exceeds max_active ({})",
                self.max_idle, self.max_active
            )));
        }
        Ok(())
    }

    pub(crate) fn address(&self) -> String {
        match self.driver {
            Driver::Tcp => format!("{}:{}", self.host, self.port),
            Driver::Unix => self.host.clone(),
        }
    }
}
