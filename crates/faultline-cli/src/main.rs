// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::env;
use std::process::ExitCode;

use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use faultline::{Client, Config, Exception, Frame, NoticeOptions, Scope};

mod logger;

const TEST_ERROR_CLASS: &str = "FaultlineTestError";
const DEFAULT_TEST_MESSAGE: &str = "Testing faultline-rust notifier";

#[tokio::main]
pub async fn main() -> ExitCode {
    let log_level = env::var("FAULTLINE_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());
    let env_filter = format!("h2=off,hyper=off,reqwest=off,rustls=off,{log_level}");

    let filter = match EnvFilter::try_new(&env_filter) {
        Ok(filter) => filter,
        Err(e) => {
            eprintln!("Could not parse log level '{log_level}': {e}");
            EnvFilter::new("info")
        }
    };
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(filter)
        .event_format(logger::Formatter)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Setting default subscriber failed: {e}");
    }

    debug!("Logging subsystem enabled");

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Error loading configuration: {e}");
            return ExitCode::from(2);
        }
    };
    if config.is_excluded_env() {
        warn!(
            "Environment '{}' is excluded by FAULTLINE_EXCLUDE_ENVS, nothing will be sent",
            config.environment_name
        );
    }

    let endpoint = config.endpoint.clone();
    let client = match Client::with_http(config) {
        Ok(client) => client,
        Err(e) => {
            error!("Error creating client: {e}");
            return ExitCode::from(2);
        }
    };

    let args: Vec<String> = env::args().skip(1).collect();
    let message = if args.is_empty() {
        DEFAULT_TEST_MESSAGE.to_string()
    } else {
        args.join(" ")
    };

    let exception = Exception::new(TEST_ERROR_CLASS, message);
    let frames = [Frame::new("main", 0)
        .with_module(module_path!())
        .with_location(file!(), line!())];
    let mut scope = Scope::new();
    scope.set_context("component", "faultline-cli");

    info!(endpoint = endpoint.as_str(), "Sending test notice");
    let result = client
        .send(&exception, &frames, &NoticeOptions::default(), &scope)
        .await;
    client.shutdown().await;

    match result {
        Ok(Some(response)) => {
            match response.get("id").and_then(|id| id.as_str()) {
                Some(id) => info!("Test notice accepted with id {id}"),
                None => info!("Test notice accepted"),
            }
            ExitCode::SUCCESS
        }
        Ok(None) => {
            warn!("Test notice was not sent");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Failed to send test notice: {e}");
            ExitCode::FAILURE
        }
    }
}
