// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `brokerbench validate` command - Validate configuration file.

use brokerbench_core::config::Properties;
use brokerbench_core::ConfigLoader;

fn print_layer(name: &str, properties: &Properties) {
    if properties.is_empty() {
        return;
    }
    println!("  {}:", name);
    for (key, value) in properties {
        println!("    {} = {}", key, value);
    }
}

pub async fn execute(file: &str) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(file = %file, "Validating configuration");

    match ConfigLoader::load_file(file) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!();
            println!("Driver Settings:");
            println!("  Driver:             {}", config.driver.name());
            println!("  Endpoints:          {}", config.endpoint_strings().join(", "));
            println!("  Persistence:        {}", config.persistence);
            println!("  Queue Type:         {}", config.queue_type.as_str());
            println!("  Replication Factor: {}", config.replication_factor);
            println!("  Ack Mode:           {}", config.ack_mode);
            println!(
                "  Topic Timeout:      {}ms",
                config.topic_create_timeout.as_millis()
            );
            println!("  Delivery Buffer:    {}", config.delivery_buffer);
            println!();
            println!("Client Properties:");
            print_layer("admin", &config.properties.admin);
            print_layer("producer", &config.properties.producer);
            print_layer("consumer", &config.properties.consumer);
            print_layer("topic", &config.properties.topic);
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed:");
            eprintln!("  {}", e);
            std::process::exit(1);
        }
    }
}
