// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `brokerbench smoke` command - Run the driver lifecycle end to end.
//!
//! Provisions a topic, attaches one consumer, sends a batch of patterned
//! payloads and checks that every payload arrives with the same CRC32.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use brokerbench_core::types::epoch_millis;
use brokerbench_core::{
    initialize, BenchmarkDriver, BrokerConnector, ConfigLoader, DriverConfig, MemoryBroker,
};
use thiserror::Error;

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(30);
const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Error)]
pub enum SmokeError {
    #[error("--live needs a build with the `rdkafka` feature")]
    LiveUnsupported,

    #[error("Only {received} of {expected} messages arrived within {timeout_secs}s")]
    Incomplete {
        expected: usize,
        received: usize,
        timeout_secs: u64,
    },

    #[error("{mismatched} payloads arrived modified")]
    Corrupted { mismatched: usize },
}

pub struct SmokeOptions {
    pub messages: usize,
    pub partitions: u32,
    pub payload_size: usize,
    pub live: bool,
}

#[derive(Default)]
struct Received {
    checksums: Vec<u32>,
    latency_ms_total: i64,
}

/// Payload `index`: a byte pattern unique enough to catch reordering bugs
/// inside a payload.
fn payload(index: usize, size: usize) -> Vec<u8> {
    (0..size)
        .map(|offset| (index.wrapping_mul(31).wrapping_add(offset) % 251) as u8)
        .collect()
}

fn connector(config: &DriverConfig, live: bool) -> Result<Arc<dyn BrokerConnector>, SmokeError> {
    if live {
        #[cfg(feature = "rdkafka")]
        {
            return Ok(Arc::new(brokerbench_core::client::kafka::RdKafkaConnector));
        }
        #[cfg(not(feature = "rdkafka"))]
        {
            return Err(SmokeError::LiveUnsupported);
        }
    }

    let broker = MemoryBroker::new(config.endpoint_strings());
    Ok(Arc::new(broker.connector()))
}

pub async fn execute(
    config_path: &str,
    options: SmokeOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = ConfigLoader::load_file(config_path)?;
    let connector = connector(&config, options.live)?;

    tracing::info!(
        driver = %config.driver,
        messages = options.messages,
        partitions = options.partitions,
        payload_size = options.payload_size,
        live = options.live,
        "Starting smoke run"
    );

    let driver = initialize(config, connector).await?;
    let result = run(driver.as_ref(), &options).await;

    if let Err(e) = driver.close().await {
        tracing::warn!(error = %e, "Driver close failed");
    }

    result
}

async fn run(
    driver: &dyn BenchmarkDriver,
    options: &SmokeOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let topic = format!("{}-{}", driver.topic_name_prefix(), epoch_millis());
    driver.create_topic(&topic, options.partitions).await?;

    let received = Arc::new(Mutex::new(Received::default()));
    let sink = Arc::clone(&received);
    driver
        .create_consumer(
            &topic,
            "smoke",
            Arc::new(move |payload: &[u8], publish_timestamp_ms: i64| {
                let mut received = sink.lock().unwrap_or_else(|e| e.into_inner());
                received.checksums.push(crc32fast::hash(payload));
                received.latency_ms_total += epoch_millis() - publish_timestamp_ms;
            }),
        )
        .await?;

    let producer = driver.create_producer(&topic)?;
    let mut expected = Vec::with_capacity(options.messages);
    let started = Instant::now();

    for index in 0..options.messages {
        let body = payload(index, options.payload_size);
        expected.push(crc32fast::hash(&body));
        let key = format!("key-{}", index % options.partitions.max(1) as usize);
        producer.send_keyed(Some(&key), &body).await?;
    }
    producer.close().await?;

    let sent_in = started.elapsed();
    tracing::info!(topic = %topic, sent = options.messages, elapsed = ?sent_in, "Payloads sent");

    let deadline = Instant::now() + DELIVERY_TIMEOUT;
    let count = loop {
        let count = received
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .checksums
            .len();
        if count >= options.messages || Instant::now() >= deadline {
            break count;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    };

    if count < options.messages {
        return Err(SmokeError::Incomplete {
            expected: options.messages,
            received: count,
            timeout_secs: DELIVERY_TIMEOUT.as_secs(),
        }
        .into());
    }

    let (mut checksums, latency_ms_total) = {
        let received = received.lock().unwrap_or_else(|e| e.into_inner());
        (received.checksums.clone(), received.latency_ms_total)
    };
    checksums.sort_unstable();
    expected.sort_unstable();

    let mismatched = checksums
        .iter()
        .zip(expected.iter())
        .filter(|(got, want)| got != want)
        .count();
    if mismatched > 0 {
        return Err(SmokeError::Corrupted { mismatched }.into());
    }

    let total = started.elapsed();
    println!("✓ Smoke run passed");
    println!();
    println!("  Driver:         {}", driver.kind());
    println!("  Topic:          {}", topic);
    println!("  Messages:       {}", options.messages);
    println!("  Payload Size:   {} bytes", options.payload_size);
    println!("  Send Time:      {:?}", sent_in);
    println!("  Total Time:     {:?}", total);
    if options.messages > 0 {
        println!(
            "  Avg Latency:    {:.2}ms",
            latency_ms_total as f64 / options.messages as f64
        );
    }

    Ok(())
}
