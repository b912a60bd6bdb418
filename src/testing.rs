/*
 * Copyright 2024 Ben Ashford
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

//! A small in-process server speaking enough of the Redis protocol to exercise the client:
//! strings, lists with `BLPOP`, scripts, PUBSUB, `AUTH`/`SELECT` and `QUIT`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::codec::{Decoder, Framed};

use crate::{
    client::script_hash,
    config::Config,
    protocol::{RespCodec, RespValue},
};

enum Entry {
    Str(Vec<u8>),
    List(VecDeque<Vec<u8>>),
}

#[derive(Default)]
struct Subscriptions {
    channels: Vec<String>,
    patterns: Vec<String>,
}

impl Subscriptions {
    fn count(&self) -> usize {
        self.channels.len() + self.patterns.len()
    }
}

struct Shared {
    password: Option<String>,
    accepted: AtomicUsize,
    data: Mutex<HashMap<Vec<u8>, Entry>>,
    pushed: Notify,
    scripts: Mutex<HashSet<String>>,
    subscribers: Mutex<HashMap<usize, Subscriptions>>,
    published: broadcast::Sender<(String, Vec<u8>)>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) struct MockServer {
    port: u16,
    shared: Arc<Shared>,
    kill: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl MockServer {
    pub(crate) async fn start() -> MockServer {
        MockServer::listen(None).await
    }

    /// A server that refuses everything but `AUTH` until given `password`
    pub(crate) async fn with_password(password: &str) -> MockServer {
        MockServer::listen(Some(password.to_string())).await
    }

    async fn listen(password: Option<String>) -> MockServer {
        let _ = env_logger::try_init();

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Cannot bind mock server");
        let port = listener.local_addr().expect("No local address").port();
        let (published, _) = broadcast::channel(64);
        let (kill, _) = broadcast::channel(1);
        let shared = Arc::new(Shared {
            password,
            accepted: AtomicUsize::new(0),
            data: Mutex::new(HashMap::new()),
            pushed: Notify::new(),
            scripts: Mutex::new(HashSet::new()),
            subscribers: Mutex::new(HashMap::new()),
            published,
        });

        let task = tokio::spawn(accept_loop(listener, shared.clone(), kill.clone()));
        MockServer {
            port,
            shared,
            kill,
            task,
        }
    }

    pub(crate) fn config(&self) -> Config {
        Config::new("127.0.0.1", self.port)
    }

    /// The number of connections accepted so far
    pub(crate) async fn accepted(&self) -> usize {
        settle().await;
        self.shared.accepted.load(Ordering::SeqCst)
    }

    /// Drops every connection accepted so far, the listener stays up
    pub(crate) async fn disconnect_all(&self) {
        settle().await;
        let _ = self.kill.send(());
        settle().await;
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        let _ = self.kill.send(());
        self.task.abort();
    }
}

/// Lets the runtime poll the IO driver, so connections the client already completed are
/// accepted (or dropped) by the server tasks.
async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

async fn accept_loop(listener: TcpListener, shared: Arc<Shared>, kill: broadcast::Sender<()>) {
    let mut next_id = 0;
    loop {
        let socket = match listener.accept().await {
            Ok((socket, _)) => socket,
            Err(e) => {
                log::warn!("Mock server cannot accept: {}", e);
                continue;
            }
        };
        shared.accepted.fetch_add(1, Ordering::SeqCst);
        next_id += 1;
        let handler = Handler {
            id: next_id,
            shared: shared.clone(),
            authenticated: shared.password.is_none(),
        };
        tokio::spawn(handler.run(socket, kill.subscribe()));
    }
}

enum Input {
    Frame(RespValue),
    Published(String, Vec<u8>),
    Closed,
}

struct Handler {
    id: usize,
    shared: Arc<Shared>,
    authenticated: bool,
}

impl Handler {
    async fn run(mut self, socket: TcpStream, mut kill: broadcast::Receiver<()>) {
        let mut framed = RespCodec.framed(socket);
        let mut published = self.shared.published.subscribe();

        loop {
            let input = tokio::select! {
                biased;
                _ = kill.recv() => Input::Closed,
                msg = published.recv() => match msg {
                    Ok((channel, data)) => Input::Published(channel, data),
                    Err(_) => continue,
                },
                frame = framed.next() => match frame {
                    Some(Ok(frame)) => Input::Frame(frame),
                    Some(Err(_)) | None => Input::Closed,
                },
            };

            let replies = match input {
                Input::Closed => break,
                Input::Published(channel, data) => self.deliveries(&channel, &data),
                Input::Frame(frame) => {
                    let args = match arguments(frame) {
                        Some(args) if !args.is_empty() => args,
                        _ => {
                            let _ = framed.send(err("ERR Protocol error")).await;
                            break;
                        }
                    };
                    let name = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();
                    match name.as_str() {
                        _ if !self.authenticated && name != "AUTH" => {
                            vec![err("NOAUTH Authentication required.")]
                        }
                        "QUIT" => {
                            let _ = framed.send(ok()).await;
                            quit(framed, kill).await;
                            break;
                        }
                        "BLPOP" => match self.blpop(&args, &mut kill).await {
                            Some(reply) => vec![reply],
                            None => break,
                        },
                        _ => self.execute(&name, &args),
                    }
                }
            };

            if replies.is_empty() {
                continue;
            }
            let mut written = Ok(());
            for reply in replies {
                written = written.and(framed.feed(reply).await);
            }
            let flushed = SinkExt::<RespValue>::flush(&mut framed).await;
            if written.and(flushed).is_err() {
                break;
            }
        }
        lock(&self.shared.subscribers).remove(&self.id);
    }

    fn execute(&mut self, name: &str, args: &[Vec<u8>]) -> Vec<RespValue> {
        let reply = match (name, args.len()) {
            ("AUTH", 2) | ("AUTH", 3) => self.auth(&args[args.len() - 1]),
            ("PING", _) if self.subscribed() => RespValue::Array(vec![
                "pong".into(),
                args.get(1).cloned().unwrap_or_default().into(),
            ]),
            ("PING", 1) => RespValue::SimpleString("PONG".into()),
            ("PING", 2) => args[1].clone().into(),
            ("SELECT", 2) => match text(&args[1]).parse::<u32>() {
                Ok(db) if db <= 15 => ok(),
                _ => err("ERR DB index is out of range"),
            },
            ("SET", 3) => {
                lock(&self.shared.data).insert(args[1].clone(), Entry::Str(args[2].clone()));
                ok()
            }
            ("GET", 2) => match lock(&self.shared.data).get(&args[1]) {
                Some(Entry::Str(value)) => value.clone().into(),
                Some(Entry::List(_)) => wrong_type(),
                None => RespValue::Nil,
            },
            ("DEL", n) if n > 1 => {
                let mut data = lock(&self.shared.data);
                let removed = args[1..].iter().filter(|k| data.remove(*k).is_some()).count();
                RespValue::Integer(removed as i64)
            }
            ("RPUSH", n) if n > 2 => self.rpush(&args[1], &args[2..]),
            ("PUBLISH", 3) => self.publish(text(&args[1]), args[2].clone()),
            ("SCRIPT", 3) if text(&args[1]).eq_ignore_ascii_case("LOAD") => {
                let hash = script_hash(&text(&args[2]));
                lock(&self.shared.scripts).insert(hash.clone());
                hash.into()
            }
            ("EVAL", n) if n > 2 => {
                lock(&self.shared.scripts).insert(script_hash(&text(&args[1])));
                run_script(&args[2..])
            }
            ("EVALSHA", n) if n > 2 => {
                if lock(&self.shared.scripts).contains(&text(&args[1]).to_ascii_lowercase()) {
                    run_script(&args[2..])
                } else {
                    err("NOSCRIPT No matching script. Please use EVAL.")
                }
            }
            ("SUBSCRIBE", n) | ("PSUBSCRIBE", n) if n > 1 => {
                return self.subscribe(name == "PSUBSCRIBE", &args[1..])
            }
            ("UNSUBSCRIBE", _) | ("PUNSUBSCRIBE", _) => {
                return self.unsubscribe(name == "PUNSUBSCRIBE", &args[1..])
            }
            (
                "AUTH" | "PING" | "SELECT" | "SET" | "GET" | "DEL" | "RPUSH" | "PUBLISH" | "SCRIPT"
                | "EVAL" | "EVALSHA" | "SUBSCRIBE" | "PSUBSCRIBE",
                _,
            ) => err(&format!(
                "ERR wrong number of arguments for '{}' command",
                name.to_ascii_lowercase()
            )),
            _ => err(&format!("ERR unknown command '{}'", name)),
        };
        vec![reply]
    }

    fn auth(&mut self, password: &[u8]) -> RespValue {
        match &self.shared.password {
            None => err("ERR AUTH called without any password configured"),
            Some(expected) if expected.as_bytes() == password => {
                self.authenticated = true;
                ok()
            }
            Some(_) => err("WRONGPASS invalid username-password pair or user is disabled."),
        }
    }

    fn rpush(&self, key: &[u8], values: &[Vec<u8>]) -> RespValue {
        let reply = {
            let mut data = lock(&self.shared.data);
            let entry = data
                .entry(key.to_vec())
                .or_insert_with(|| Entry::List(VecDeque::new()));
            match entry {
                Entry::List(list) => {
                    list.extend(values.iter().cloned());
                    RespValue::Integer(list.len() as i64)
                }
                Entry::Str(_) => wrong_type(),
            }
        };
        self.shared.pushed.notify_waiters();
        reply
    }

    fn pop_front(&self, keys: &[Vec<u8>]) -> Option<RespValue> {
        let mut data = lock(&self.shared.data);
        for key in keys {
            if let Some(Entry::List(list)) = data.get_mut(key) {
                if let Some(value) = list.pop_front() {
                    if list.is_empty() {
                        data.remove(key);
                    }
                    return Some(RespValue::Array(vec![key.clone().into(), value.into()]));
                }
            }
        }
        None
    }

    /// `None` if the server was told to drop the connection while waiting
    async fn blpop(
        &self,
        args: &[Vec<u8>],
        kill: &mut broadcast::Receiver<()>,
    ) -> Option<RespValue> {
        if args.len() < 3 {
            return Some(err("ERR wrong number of arguments for 'blpop' command"));
        }
        let keys = &args[1..args.len() - 1];
        let secs = match text(&args[args.len() - 1]).parse::<f64>() {
            Ok(secs) if secs >= 0.0 => secs,
            _ => return Some(err("ERR timeout is not a float or out of range")),
        };
        let deadline = (secs > 0.0).then(|| Instant::now() + Duration::from_secs_f64(secs));

        loop {
            let notified = self.shared.pushed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(reply) = self.pop_front(keys) {
                return Some(reply);
            }
            let expired = async {
                match deadline {
                    Some(deadline) => time::sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            };
            tokio::select! {
                biased;
                _ = kill.recv() => return None,
                _ = &mut notified => {}
                _ = expired => return Some(RespValue::Nil),
            }
        }
    }

    fn publish(&self, channel: String, data: Vec<u8>) -> RespValue {
        let receivers: usize = lock(&self.shared.subscribers)
            .values()
            .map(|subs| {
                let direct = subs.channels.contains(&channel) as usize;
                let patterns = subs
                    .patterns
                    .iter()
                    .filter(|p| glob_matches(p.as_bytes(), channel.as_bytes()))
                    .count();
                direct + patterns
            })
            .sum();
        let _ = self.shared.published.send((channel, data));
        RespValue::Integer(receivers as i64)
    }

    fn deliveries(&self, channel: &str, data: &[u8]) -> Vec<RespValue> {
        let subscribers = lock(&self.shared.subscribers);
        let subs = match subscribers.get(&self.id) {
            Some(subs) => subs,
            None => return Vec::new(),
        };
        let mut events = Vec::new();
        if subs.channels.iter().any(|c| c == channel) {
            events.push(resp_array!["message", channel, data]);
        }
        for pattern in &subs.patterns {
            if glob_matches(pattern.as_bytes(), channel.as_bytes()) {
                events.push(resp_array!["pmessage", pattern, channel, data]);
            }
        }
        events
    }

    fn subscribed(&self) -> bool {
        lock(&self.shared.subscribers)
            .get(&self.id)
            .map_or(false, |subs| subs.count() > 0)
    }

    fn subscribe(&self, pattern: bool, targets: &[Vec<u8>]) -> Vec<RespValue> {
        let kind = if pattern { "psubscribe" } else { "subscribe" };
        let mut subscribers = lock(&self.shared.subscribers);
        let subs = subscribers.entry(self.id).or_default();
        targets
            .iter()
            .map(|target| {
                let target = text(target);
                let list = if pattern {
                    &mut subs.patterns
                } else {
                    &mut subs.channels
                };
                if !list.contains(&target) {
                    list.push(target.clone());
                }
                subscription(kind, target.into(), subs)
            })
            .collect()
    }

    fn unsubscribe(&self, pattern: bool, targets: &[Vec<u8>]) -> Vec<RespValue> {
        let kind = if pattern { "punsubscribe" } else { "unsubscribe" };
        let mut subscribers = lock(&self.shared.subscribers);
        let subs = subscribers.entry(self.id).or_default();
        let targets: Vec<String> = if targets.is_empty() {
            if pattern {
                subs.patterns.clone()
            } else {
                subs.channels.clone()
            }
        } else {
            targets.iter().map(|t| text(t)).collect()
        };
        if targets.is_empty() {
            return vec![subscription(kind, RespValue::Nil, subs)];
        }
        targets
            .into_iter()
            .map(|target| {
                let list = if pattern {
                    &mut subs.patterns
                } else {
                    &mut subs.channels
                };
                list.retain(|t| *t != target);
                subscription(kind, target.into(), subs)
            })
            .collect()
    }
}

/// After `QUIT` the server stops writing but keeps reading until the client goes away, so
/// replies already sent are not lost to a reset
async fn quit(mut framed: Framed<TcpStream, RespCodec>, mut kill: broadcast::Receiver<()>) {
    let _ = framed.get_mut().shutdown().await;
    loop {
        tokio::select! {
            biased;
            _ = kill.recv() => return,
            frame = framed.next() => match frame {
                Some(Ok(_)) => continue,
                Some(Err(_)) | None => return,
            },
        }
    }
}

fn subscription(kind: &str, target: RespValue, subs: &Subscriptions) -> RespValue {
    RespValue::Array(vec![
        kind.into(),
        target,
        RespValue::Integer(subs.count() as i64),
    ])
}

fn arguments(frame: RespValue) -> Option<Vec<Vec<u8>>> {
    match frame {
        RespValue::Array(items) => items
            .into_iter()
            .map(|item| match item {
                RespValue::BulkString(bytes) => Some(bytes),
                _ => None,
            })
            .collect(),
        _ => None,
    }
}

/// Echoes a script's keys and arguments back, which is all the tests need a script to do
fn run_script(numkeys_and_args: &[Vec<u8>]) -> RespValue {
    match text(&numkeys_and_args[0]).parse::<usize>() {
        Ok(numkeys) if numkeys < numkeys_and_args.len() => RespValue::Array(
            numkeys_and_args[1..]
                .iter()
                .map(|arg| arg.clone().into())
                .collect(),
        ),
        Ok(_) => err("ERR Number of keys can't be greater than number of args"),
        Err(_) => err("ERR value is not an integer or out of range"),
    }
}

fn glob_matches(pattern: &[u8], text: &[u8]) -> bool {
    match pattern.split_first() {
        None => text.is_empty(),
        Some((b'*', rest)) => (0..=text.len()).any(|i| glob_matches(rest, &text[i..])),
        Some((b'?', rest)) => !text.is_empty() && glob_matches(rest, &text[1..]),
        Some((c, rest)) => text.first() == Some(c) && glob_matches(rest, &text[1..]),
    }
}

fn text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn ok() -> RespValue {
    RespValue::SimpleString("OK".into())
}

fn err(msg: &str) -> RespValue {
    RespValue::Error(msg.to_string())
}

fn wrong_type() -> RespValue {
    err("WRONGTYPE Operation against a key holding the wrong kind of value")
}

#[cfg(test)]
mod test {
    use super::glob_matches;

    #[test]
    fn globs() {
        assert!(glob_matches(b"ptest.*", b"ptest.1"));
        assert!(glob_matches(b"*", b""));
        assert!(glob_matches(b"n?ws", b"news"));
        assert!(!glob_matches(b"ptest.*", b"other"));
        assert!(!glob_matches(b"news", b"news2"));
    }
}
