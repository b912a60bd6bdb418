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

use futures::StreamExt;

use redis_lender::{
    client::{pubsub::Event, Client},
    config::Config,
};

#[tokio::main]
async fn main() {
    env_logger::init();

    let topic = env::args().nth(1).unwrap_or_else(|| "test-topic".to_string());
    let host = env::args().nth(2).unwrap_or_else(|| "127.0.0.1".to_string());

    let client = Client::new(Config::new(host, 6379));
    let mut pubsub = client
        .pubsub()
        .await
        .expect("Cannot connect to Redis");
    pubsub
        .subscribe(vec![topic])
        .await
        .expect("Cannot subscribe to topic");

    let mut events = Box::pin(pubsub.into_stream());
    while let Some(event) = events.next().await {
        match event {
            Ok(Event::Message(message)) => {
                println!("{}", String::from_utf8_lossy(&message.data))
            }
            Ok(other) => println!("{:?}", other),
            Err(e) => eprintln!("ERROR: {}", e),
        }
    }
}
