// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Longest string, in characters, kept in a notice before truncation
pub const MAX_STRING_LENGTH: usize = 10_000;

/// Appended to any string cut down to [`MAX_STRING_LENGTH`]
pub const TRUNCATION_MARKER: &str = "...";

/// Deepest nesting level the sanitizer descends to; the top-level value is depth 0
pub const MAX_DEPTH: usize = 10;

/// Stack frames kept per notice
pub const MAX_FRAMES: usize = 100;

pub const FILTERED: &str = "[FILTERED]";
pub const DEPTH_SENTINEL: &str = "[DEPTH]";
pub const CIRCULAR_SENTINEL: &str = "[CIRCULAR]";
pub const PROJECT_ROOT_PLACEHOLDER: &str = "[PROJECT_ROOT]";

/// Growth factor of the delivery delay per consecutive failure
pub const THROTTLE_BASE: f64 = 1.05;

/// Ceiling of the delivery delay, in seconds
pub const MAX_DELAY_SECONDS: f64 = 100.0;

/// Ceiling of the failure counter. The delay saturates long before this
/// (1.05^95 - 1 > 100).
pub const MAX_THROTTLE: u32 = 1000;

/// Context key holding the captured process environment
pub const ENVIRONMENT_VARIABLES_KEY: &str = "environment_variables";

pub const NOTIFIER_NAME: &str = "faultline-rust";
pub const NOTIFIER_URL: &str = "https://github.com/faultline-dev/faultline-rust";
pub const NOTIFIER_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NOTIFIER_LANGUAGE: &str = "rust";

pub const DEFAULT_ENDPOINT: &str = "https://api.faultline.dev";
pub const NOTICES_PATH: &str = "/v1/notices";
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 1000;
pub const DEFAULT_FLUSH_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_FILTER_KEYS: [&str; 6] = [
    "password",
    "credit_card",
    "secret",
    "token",
    "api_key",
    "authorization",
];
pub const DEFAULT_EXCLUDE_ENVS: [&str; 2] = ["dev", "test"];
