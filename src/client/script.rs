/*
 * Copyright 2024 Ben Ashford
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use sha1::{Digest, Sha1};

use super::{pipeline::Pipeline, pool::Pool};

use crate::{
    error::{self, Error},
    protocol::{FromResp, RespValue},
    task,
};

/// The SHA-1 of a script, as lowercase hex.  This is the name Redis gives a script in its
/// script cache.
pub fn script_hash(source: &str) -> String {
    hex::encode(Sha1::digest(source.as_bytes()))
}

/// A Lua script run on the server, addressed by the hash of its source.
///
/// `eval` only ever sends the hash (`EVALSHA`).  If the server has not seen the script, the
/// call fails with an error for which `Error::is_no_script` is true; reloading is left to the
/// caller, via `load` or `eval_source`.
///
/// Like every pooled operation these can be bounded by wrapping them in `tokio::time::timeout`,
/// or cancelled by dropping them; a connection abandoned while it still owes a reply is closed
/// rather than returned to the pool.  `eval_timeout` does this for `eval`.
#[derive(Clone)]
pub struct Script {
    pool: Pool,
    key_count: usize,
    source: Arc<str>,
    hash: Arc<str>,
}

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Script")
            .field("key_count", &self.key_count)
            .field("hash", &self.hash)
            .finish()
    }
}

impl Script {
    pub(crate) fn new(pool: Pool, key_count: usize, source: impl Into<Arc<str>>) -> Self {
        let source = source.into();
        let hash = script_hash(&source).into();
        Script {
            pool,
            key_count,
            source,
            hash,
        }
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn key_count(&self) -> usize {
        self.key_count
    }

    /// Registers the source with the server's script cache
    pub async fn load(&self) -> Result<(), Error> {
        let mut connection = self.pool.get().await?;
        let hash: String = connection
            .send(resp_array!["SCRIPT", "LOAD", self.source.clone()])
            .await?;
        self.verify_hash(hash)
    }

    /// The server must name the script by the same hash.  A mismatch is a protocol error; the
    /// connection itself is fine.
    fn verify_hash(&self, hash: String) -> Result<(), Error> {
        if hash.eq_ignore_ascii_case(&self.hash) {
            return Ok(());
        }
        Err(error::resp(
            format!("Server hashed script as {}, expected {}", hash, self.hash),
            RespValue::BulkString(hash.into_bytes()),
        ))
    }

    /// Runs the script by hash.  The first `key_count` values are the keys, the rest are the
    /// arguments.
    pub async fn eval<T, I, A>(&self, keys_and_args: I) -> Result<T, Error>
    where
        T: FromResp,
        I: IntoIterator<Item = A>,
        A: Into<RespValue>,
    {
        let command = self.command("EVALSHA", self.hash.clone(), keys_and_args)?;
        self.pool.get().await?.send(command).await
    }

    /// As `eval`, but gives up with `Error::Timeout` if the script has not replied within
    /// `timeout`, borrowing included
    pub async fn eval_timeout<T, I, A>(
        &self,
        timeout: Duration,
        keys_and_args: I,
    ) -> Result<T, Error>
    where
        T: FromResp,
        I: IntoIterator<Item = A>,
        A: Into<RespValue>,
    {
        let command = self.command("EVALSHA", self.hash.clone(), keys_and_args)?;
        task::deadline(timeout, async {
            self.pool.get().await?.send(command).await
        })
        .await
    }

    /// Runs the script by sending its whole source (`EVAL`), which also caches it on the server
    pub async fn eval_source<T, I, A>(&self, keys_and_args: I) -> Result<T, Error>
    where
        T: FromResp,
        I: IntoIterator<Item = A>,
        A: Into<RespValue>,
    {
        let command = self.command("EVAL", self.source.clone(), keys_and_args)?;
        self.pool.get().await?.send(command).await
    }

    /// Queues an invocation by hash onto a pipeline
    pub fn queue<I, A>(&self, pipeline: &mut Pipeline, keys_and_args: I) -> Result<(), Error>
    where
        I: IntoIterator<Item = A>,
        A: Into<RespValue>,
    {
        let command = self.command("EVALSHA", self.hash.clone(), keys_and_args)?;
        pipeline.send(command);
        Ok(())
    }

    fn command<I, A>(
        &self,
        name: &str,
        script: Arc<str>,
        keys_and_args: I,
    ) -> Result<RespValue, Error>
    where
        I: IntoIterator<Item = A>,
        A: Into<RespValue>,
    {
        let keys_and_args: Vec<RespValue> = keys_and_args.into_iter().map(Into::into).collect();
        if keys_and_args.len() < self.key_count {
            return Err(error::internal(format!(
                "Script expects {} keys, only {} values given",
                self.key_count,
                keys_and_args.len()
            )));
        }
        Ok(resp_array![name, script, self.key_count].append(keys_and_args))
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use crate::{error::Error, protocol::RespValue, testing::MockServer};

    use super::super::pool::Pool;
    use super::script_hash;

    #[test]
    fn hash_is_sha1_hex() {
        assert_eq!(
            script_hash("abc"),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
        assert_eq!(script_hash(""), "da39a3ee5e6b4b0d3255bfef95601890afd80709");
    }

    #[test]
    fn hash_depends_only_on_source() {
        let source = "return redis.call('GET', KEYS[1])";
        assert_eq!(script_hash(source), script_hash(&source.to_string()));
        assert_ne!(script_hash(source), script_hash("return 1"));
        assert_eq!(script_hash(source).len(), 40);
    }

    #[tokio::test]
    async fn construction_does_no_io() {
        let server = MockServer::start().await;
        let pool = Pool::new(server.config()).unwrap();
        let script = pool.script(1, "return KEYS[1]");
        assert_eq!(script.hash(), script_hash("return KEYS[1]"));
        assert_eq!(script.key_count(), 1);
        assert_eq!(server.accepted().await, 0);
    }

    #[tokio::test]
    async fn eval_needs_load() {
        let server = MockServer::start().await;
        let pool = Pool::new(server.config()).unwrap();
        let script = pool.script(1, "return {KEYS[1], ARGV[1]}");

        let unknown: Result<RespValue, _> = script.eval(vec!["key", "arg"]).await;
        match unknown {
            Err(e) => assert!(e.is_no_script(), "Unexpected error: {:?}", e),
            Ok(v) => panic!("Script ran without being loaded: {:?}", v),
        }

        script.load().await.expect("Cannot load script");
        let result: Vec<String> = script.eval(vec!["key", "arg"]).await.unwrap();
        assert_eq!(result, vec!["key".to_string(), "arg".to_string()]);
    }

    #[tokio::test]
    async fn eval_source_caches_script() {
        let server = MockServer::start().await;
        let pool = Pool::new(server.config()).unwrap();
        let script = pool.script(0, "return ARGV");

        let result: Vec<String> = script.eval_source(vec!["x"]).await.unwrap();
        assert_eq!(result, vec!["x".to_string()]);
        let result: Vec<String> = script.eval(vec!["y"]).await.unwrap();
        assert_eq!(result, vec!["y".to_string()]);
    }

    #[tokio::test]
    async fn too_few_keys() {
        let server = MockServer::start().await;
        let pool = Pool::new(server.config()).unwrap();
        let script = pool.script(2, "return 1");

        let result: Result<RespValue, _> = script.eval(vec!["only-one"]).await;
        assert!(matches!(result, Err(Error::Internal(_))));
        assert_eq!(server.accepted().await, 0);
    }

    #[tokio::test]
    async fn queued_on_pipeline() {
        let server = MockServer::start().await;
        let pool = Pool::new(server.config()).unwrap();
        let script = pool.script(1, "return KEYS");
        script.load().await.unwrap();

        let mut pipeline = pool.pipeline();
        script.queue(&mut pipeline, vec!["a"]).unwrap();
        script.queue(&mut pipeline, vec!["b"]).unwrap();
        let values = pipeline.exec().await.unwrap().values::<Vec<String>>();
        assert_eq!(values[0].as_ref().unwrap(), &vec!["a".to_string()]);
        assert_eq!(values[1].as_ref().unwrap(), &vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn mismatched_hash_is_not_a_broken_link() {
        let server = MockServer::start().await;
        let pool = Pool::new(server.config()).unwrap();
        let script = pool.script(0, "return 1");

        assert!(script.verify_hash(script.hash().to_uppercase()).is_ok());
        let e = script.verify_hash("0".repeat(40)).unwrap_err();
        assert!(!e.is_transport(), "Mismatch reported as transport failure: {:?}", e);
        assert!(matches!(e, Error::RESP(_, Some(RespValue::BulkString(_)))));
    }

    #[tokio::test]
    async fn eval_timeout_on_exhausted_pool() {
        let server = MockServer::start().await;
        let pool = Pool::new(server.config().with_max_active(1).with_max_idle(1)).unwrap();
        let script = pool.script(0, "return ARGV");
        script.load().await.unwrap();

        let held = pool.get().await.unwrap();
        let result: Result<Vec<String>, _> =
            script.eval_timeout(Duration::from_millis(100), vec!["x"]).await;
        assert!(matches!(result, Err(Error::Timeout)));
        assert_eq!(pool.stats().active, 1);

        drop(held);
        let result: Vec<String> = script
            .eval_timeout(Duration::from_secs(1), vec!["x"])
            .await
            .unwrap();
        assert_eq!(result, vec!["x".to_string()]);
    }
}
