use chrono::Utc;
use clap::Parser;
use lib_streams::configs::{RedisConfig, StreamRegistration, StreamServerConfig};
use lib_streams::connections::{StreamConnection, StreamStore};
use lib_streams::loggers::{LogOptions, init_tracing};
use lib_streams::streams::{ConsumerServer, StreamPublisher, TypedSchema};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::sleep;
use validator::Validate;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Publishes events to a Redis stream and measures consume/ack throughput", long_about = None)]
struct Args {
    /// Redis connection URL
    #[clap(long, env = "REDIS_URL", default_value = "redis://localhost:6379")]
    redis_url: String,

    /// Number of events to publish
    #[clap(short, long, default_value_t = 1000)]
    count: u64,

    /// Entries fetched per read
    #[clap(short, long, default_value_t = 10)]
    batch_size: i64,

    /// Seconds to wait for the consumer to catch up
    #[clap(long, default_value_t = 60)]
    timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct UserCreated {
    value: String,
    user_id: i64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _guard = init_tracing(&LogOptions::new("test_stream_throughput").with_level("warn"))?;

    let run_id = Utc::now().timestamp_millis();
    let stream = format!("throughput_{}", run_id);
    let redis = RedisConfig::from_url(args.redis_url.clone())?;

    let mut config = StreamServerConfig::for_streams([stream.as_str()]);
    config.group = format!("throughput_group_{}", run_id);
    config.batch_size = args.batch_size;
    config.block_timeout_ms = 500;
    config.redis = Some(redis.clone());

    let handled = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&handled);
    let mut server = ConsumerServer::new(config)?;
    server.on::<UserCreated, _, _>("user_created", move |_event: UserCreated| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    })?;
    server.listen(|| println!("Consumer ready")).await?;

    let connection = Arc::new(StreamConnection::new(redis)?);
    let publisher = StreamPublisher::new(connection.clone(), StreamRegistration::new(stream.clone())?);
    let schema = TypedSchema::<UserCreated>::new();

    let publish_started = Utc::now();
    for user_id in 0..args.count as i64 {
        let event = UserCreated { value: "hello world".to_string(), user_id };
        publisher.send("user_created", &schema, &event).await?;
    }
    let publish_secs = (Utc::now() - publish_started).num_milliseconds().max(1) as f64 / 1000.0;
    println!(
        "Published {} events to {} in {:.2}s ({:.0}/s)",
        args.count,
        stream,
        publish_secs,
        args.count as f64 / publish_secs
    );

    let deadline = Utc::now() + chrono::Duration::seconds(args.timeout_secs as i64);
    while handled.load(Ordering::Relaxed) < args.count && Utc::now() < deadline {
        sleep(Duration::from_millis(100)).await;
    }
    let total_secs = (Utc::now() - publish_started).num_milliseconds().max(1) as f64 / 1000.0;
    let done = handled.load(Ordering::Relaxed);
    println!(
        "Handled {}/{} events in {:.2}s ({:.0}/s)",
        done,
        args.count,
        total_secs,
        done as f64 / total_secs
    );

    server.on_shutdown("done").await?;
    let pending = connection.pending_count(&stream, &server.config().group).await?;
    println!("Pending after shutdown: {}", pending);
    connection.close().await?;
    Ok(())
}
