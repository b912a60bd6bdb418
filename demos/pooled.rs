/*
 * Copyright 2017-2024 Ben Ashford
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

use std::env;

use futures::future;

use redis_lender::{client::Client, config::Config, error::Error, resp_array};

// An artificial "realistic" non-trivial example to demonstrate usage
#[tokio::main]
async fn main() -> Result<(), Error> {
    env_logger::init();

    let host = env::args().nth(1).unwrap_or_else(|| "127.0.0.1".to_string());
    let client = Client::new(Config::new(host, 6379).with_max_active(4).with_max_idle(2));

    // Create some completely arbitrary "test data"
    let test_data: Vec<_> = (0..10).map(|x| (x, x.to_string())).collect();

    let futures = test_data.into_iter().map(|data| {
        let pool = client.pool().clone();
        async move {
            let mut connection = pool.get().await?;
            let ctr: i64 = connection
                .send(resp_array!["INCR", "realistic_test_ctr"])
                .await?;
            let key = format!("rt_{}", ctr);
            let () = connection
                .send(resp_array!["SET", &key, data.0.to_string()])
                .await?;
            let () = connection.send(resp_array!["SET", data.1, key]).await?;
            Ok::<_, Error>(())
        }
    });
    for result in future::join_all(futures).await {
        result?;
    }
    println!("Pool after the run: {:?}", client.pool().stats());

    let mut pipeline = client.pool().pipeline();
    for x in 0..10 {
        pipeline.send(resp_array!["GET", x.to_string()]);
    }
    for (x, reply) in pipeline.exec().await?.values::<String>().into_iter().enumerate() {
        println!("{} => {:?}", x, reply);
    }

    let script = client
        .pool()
        .script(1, "return redis.call('GET', KEYS[1])");
    let value: Option<String> = match script.eval(vec!["rt_1"]).await {
        Err(e) if e.is_no_script() => script.eval_source(vec!["rt_1"]).await?,
        result => result?,
    };
    println!("Script {} returned {:?}", script.hash(), value);

    client.pool().close();
    Ok(())
}
