/*
 * Copyright 2020-2024 Ben Ashford
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

use std::future::Future;
use std::time::Duration;

use crate::error::Error;

/// Runs `future` for at most `duration`, returning `None` if it did not finish in time. A zero
/// duration means no limit.
pub(crate) async fn timeout<T>(duration: Duration, future: T) -> Option<T::Output>
where
    T: Future,
{
    if duration.is_zero() {
        return Some(future.await);
    }
    tokio::time::timeout(duration, future).await.ok()
}

/// Runs a fallible `future` for at most `duration`, failing with `Error::Timeout` if it did not
/// finish in time.  The future is dropped on expiry, which cancels whatever it was doing.
pub(crate) async fn deadline<F, T>(duration: Duration, future: F) -> Result<T, Error>
where
    F: Future<Output = Result<T, Error>>,
{
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout),
    }
}
