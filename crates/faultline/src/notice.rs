// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Assembly of notices from captured errors.
//!
//! A [`Notice`] is built once, at capture time, from an [`Exception`], its stack [`Frame`]s,
//! the per-call [`NoticeOptions`] and the ambient [`Scope`]. Context, request and user data are
//! sanitized during the build, so a notice never holds unredacted data and can be handed to
//! the delivery worker as is.

use chrono::{SecondsFormat, Utc};
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::config::Config;
use crate::constants::{
    ENVIRONMENT_VARIABLES_KEY, MAX_FRAMES, NOTIFIER_LANGUAGE, NOTIFIER_NAME, NOTIFIER_URL,
    NOTIFIER_VERSION, PROJECT_ROOT_PLACEHOLDER,
};
use crate::sanitizer::{sanitize_map, truncate};
use crate::scope::Scope;
use crate::value::Map;

/// The error being reported: an unqualified type name and a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exception {
    class: String,
    message: String,
}

impl Exception {
    pub fn new(class: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            message: message.into(),
        }
    }

    /// Uses the error's type name as class and its `Display` output as message.
    ///
    /// `std::io::Error` gives `Error`, `my_app::Wrapper<std::io::Error>` gives `Wrapper`.
    pub fn from_error<E: std::error::Error + ?Sized>(error: &E) -> Self {
        Self {
            class: unqualified_type_name(std::any::type_name::<E>()),
            message: error.to_string(),
        }
    }

    #[must_use]
    pub fn class(&self) -> &str {
        &self.class
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

fn unqualified_type_name(full: &str) -> String {
    let without_generics = full.split('<').next().unwrap_or(full);
    without_generics
        .rsplit("::")
        .next()
        .unwrap_or(without_generics)
        .trim_start_matches("dyn ")
        .to_string()
}

/// One stack frame, outermost call last.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    pub module: Option<String>,
    pub function: String,
    pub arity: u32,
    pub file: Option<String>,
    pub line: Option<u32>,
}

impl Frame {
    pub fn new(function: impl Into<String>, arity: u32) -> Self {
        Self {
            function: function.into(),
            arity,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    #[must_use]
    pub fn with_location(mut self, file: impl Into<String>, line: u32) -> Self {
        self.file = Some(file.into());
        self.line = Some(line);
        self
    }

    /// `<file>:<line> in <module>.<function>/<arity>`
    #[must_use]
    pub fn format(&self, project_root: Option<&str>) -> String {
        let file = match (self.file.as_deref(), project_root) {
            (Some(file), Some(root)) if !root.is_empty() => match file.strip_prefix(root) {
                Some(rest) => format!("{PROJECT_ROOT_PLACEHOLDER}{rest}"),
                None => file.to_string(),
            },
            (Some(file), _) => file.to_string(),
            (None, _) => "nofile".to_string(),
        };
        let line = self.line.unwrap_or(0);
        match &self.module {
            Some(module) => format!(
                "{file}:{line} in {module}.{}/{}",
                self.function, self.arity
            ),
            None => format!("{file}:{line} in {}/{}", self.function, self.arity),
        }
    }
}

/// Data supplied with a single capture call. Entries win over the [`Scope`] on key collision.
#[derive(Debug, Clone, Default)]
pub struct NoticeOptions {
    pub context: Map,
    /// Replaces the scope's user entirely when set
    pub user: Option<Map>,
    pub request: Map,
    pub fingerprint: Option<String>,
    pub tags: Vec<String>,
}

/// A sanitized error event ready for delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    error_class: String,
    message: String,
    backtrace: Vec<String>,
    fingerprint: Option<String>,
    tags: Vec<String>,
    context: JsonMap<String, JsonValue>,
    request: JsonMap<String, JsonValue>,
    user: JsonMap<String, JsonValue>,
    environment: String,
    occurred_at: String,
    notifier: JsonMap<String, JsonValue>,
}

impl Notice {
    #[must_use]
    pub fn build(
        exception: &Exception,
        frames: &[Frame],
        options: &NoticeOptions,
        scope: &Scope,
        config: &Config,
    ) -> Self {
        let filter = config.key_filter();
        let project_root = config.project_root.as_deref();

        let backtrace = frames
            .iter()
            .take(MAX_FRAMES)
            .map(|frame| truncate(&frame.format(project_root)))
            .collect();

        let context = scope.context().merged(&options.context);
        if config.send_environment {
            // Names that are not UTF-8 are skipped, values are converted lossily
            let variables: Map = std::env::vars_os()
                .filter_map(|(name, value)| {
                    let name = name.into_string().ok()?;
                    Some((name, value.to_string_lossy().into_owned()))
                })
                .collect();
            context.insert(ENVIRONMENT_VARIABLES_KEY, variables);
        }

        let request = if config.send_request_data {
            let request = scope.request().merged(&options.request);
            if config.filter_session {
                request.remove("session");
            }
            sanitize_map(&request, &filter)
        } else {
            JsonMap::new()
        };

        let user = if config.send_user_data {
            options
                .user
                .as_ref()
                .or(scope.user())
                .map(|user| sanitize_map(user, &filter))
                .unwrap_or_default()
        } else {
            JsonMap::new()
        };

        Self {
            error_class: truncate(exception.class()),
            message: truncate(exception.message()),
            backtrace,
            fingerprint: options.fingerprint.as_deref().map(truncate),
            tags: options.tags.iter().map(|tag| truncate(tag)).collect(),
            context: sanitize_map(&context, &filter),
            request,
            user,
            environment: config.environment_name.clone(),
            occurred_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            notifier: notifier(config),
        }
    }

    #[must_use]
    pub fn error_class(&self) -> &str {
        &self.error_class
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn backtrace(&self) -> &[String] {
        &self.backtrace
    }

    #[must_use]
    pub fn fingerprint(&self) -> Option<&str> {
        self.fingerprint.as_deref()
    }

    #[must_use]
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    #[must_use]
    pub fn context(&self) -> &JsonMap<String, JsonValue> {
        &self.context
    }

    #[must_use]
    pub fn request(&self) -> &JsonMap<String, JsonValue> {
        &self.request
    }

    #[must_use]
    pub fn user(&self) -> &JsonMap<String, JsonValue> {
        &self.user
    }

    #[must_use]
    pub fn environment(&self) -> &str {
        &self.environment
    }

    #[must_use]
    pub fn occurred_at(&self) -> &str {
        &self.occurred_at
    }

    #[must_use]
    pub fn notifier(&self) -> &JsonMap<String, JsonValue> {
        &self.notifier
    }

    /// Copy with a different grouping key, for before-notify callbacks
    #[must_use]
    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(truncate(&fingerprint.into()));
        self
    }

    #[must_use]
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags.iter().map(|tag| truncate(tag)).collect();
        self
    }

    /// Copy with a different message, truncated like any other string
    #[must_use]
    pub fn with_message(mut self, message: &str) -> Self {
        self.message = truncate(message);
        self
    }

    /// Wire representation sent to the collector.
    #[must_use]
    pub fn to_payload(&self) -> JsonValue {
        let mut error = JsonMap::new();
        error.insert("class".to_string(), self.error_class.clone().into());
        error.insert("message".to_string(), self.message.clone().into());
        error.insert("backtrace".to_string(), self.backtrace.clone().into());
        error.insert("occurred_at".to_string(), self.occurred_at.clone().into());
        if let Some(fingerprint) = &self.fingerprint {
            error.insert("fingerprint".to_string(), fingerprint.clone().into());
        }
        if !self.tags.is_empty() {
            error.insert("tags".to_string(), self.tags.clone().into());
        }

        let mut context = self.context.clone();
        context.insert("environment".to_string(), self.environment.clone().into());

        let mut payload = JsonMap::new();
        payload.insert("error".to_string(), JsonValue::Object(error));
        payload.insert("context".to_string(), JsonValue::Object(context));
        payload.insert(
            "notifier".to_string(),
            JsonValue::Object(self.notifier.clone()),
        );
        if !self.request.is_empty() {
            payload.insert(
                "request".to_string(),
                JsonValue::Object(self.request.clone()),
            );
        }
        if !self.user.is_empty() {
            payload.insert("user".to_string(), JsonValue::Object(self.user.clone()));
        }
        JsonValue::Object(payload)
    }
}

fn notifier(config: &Config) -> JsonMap<String, JsonValue> {
    let mut notifier = JsonMap::new();
    notifier.insert("name".to_string(), NOTIFIER_NAME.into());
    notifier.insert("url".to_string(), NOTIFIER_URL.into());
    notifier.insert("version".to_string(), NOTIFIER_VERSION.into());
    notifier.insert("language".to_string(), NOTIFIER_LANGUAGE.into());
    if !config.app_name.is_empty() {
        notifier.insert("app_name".to_string(), config.app_name.clone().into());
    }
    if !config.revision.is_empty() {
        notifier.insert("revision".to_string(), config.revision.clone().into());
    }
    notifier
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::constants::MAX_STRING_LENGTH;
    use serde_json::json;
    use serial_test::serial;
    use std::fmt;

    #[derive(Debug)]
    struct ParseFailure;

    impl fmt::Display for ParseFailure {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "unexpected end of input")
        }
    }

    impl std::error::Error for ParseFailure {}

    #[derive(Debug)]
    struct Wrapper<E>(E);

    impl<E: fmt::Display> fmt::Display for Wrapper<E> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "wrapped: {}", self.0)
        }
    }

    impl<E: fmt::Debug + fmt::Display> std::error::Error for Wrapper<E> {}

    fn build(options: &NoticeOptions, scope: &Scope, config: &Config) -> Notice {
        Notice::build(
            &Exception::new("ArgumentError", "bad argument"),
            &[],
            options,
            scope,
            config,
        )
    }

    #[test]
    fn test_exception_from_error_uses_unqualified_type_name() {
        let exception = Exception::from_error(&ParseFailure);
        assert_eq!(exception.class(), "ParseFailure");
        assert_eq!(exception.message(), "unexpected end of input");

        let exception = Exception::from_error(&Wrapper(ParseFailure));
        assert_eq!(exception.class(), "Wrapper");
        assert_eq!(exception.message(), "wrapped: unexpected end of input");

        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk");
        assert_eq!(Exception::from_error(&io).class(), "Error");
    }

    #[test]
    fn test_frame_format() {
        let frame = Frame::new("handle_call", 3)
            .with_module("MyApp.Server")
            .with_location("lib/my_app/server.ex", 42);
        assert_eq!(
            frame.format(None),
            "lib/my_app/server.ex:42 in MyApp.Server.handle_call/3"
        );

        let frame = Frame::new("main", 0);
        assert_eq!(frame.format(None), "nofile:0 in main/0");
    }

    #[test]
    fn test_frame_project_root_is_replaced() {
        let frame = Frame::new("run", 1).with_location("/srv/app/src/main.rs", 9);

        assert_eq!(
            frame.format(Some("/srv/app")),
            "[PROJECT_ROOT]/src/main.rs:9 in run/1"
        );
        assert_eq!(frame.format(Some("/other")), "/srv/app/src/main.rs:9 in run/1");
        assert_eq!(frame.format(Some("")), "/srv/app/src/main.rs:9 in run/1");
    }

    #[test]
    fn test_backtrace_is_limited_and_ordered() {
        let frames: Vec<Frame> = (0..150).map(|i| Frame::new(format!("f{i}"), 0)).collect();

        let notice = Notice::build(
            &Exception::new("E", "m"),
            &frames,
            &NoticeOptions::default(),
            &Scope::new(),
            &Config::default(),
        );

        assert_eq!(notice.backtrace().len(), MAX_FRAMES);
        assert_eq!(notice.backtrace()[0], "nofile:0 in f0/0");
        assert_eq!(notice.backtrace()[99], "nofile:0 in f99/0");
    }

    #[test]
    fn test_message_is_truncated() {
        let notice = Notice::build(
            &Exception::new("E", "m".repeat(MAX_STRING_LENGTH * 2)),
            &[],
            &NoticeOptions::default(),
            &Scope::new(),
            &Config::default(),
        );

        assert_eq!(notice.message().chars().count(), MAX_STRING_LENGTH + 3);
        assert!(notice.message().ends_with("..."));
    }

    #[test]
    fn test_call_options_override_scope() {
        let mut scope = Scope::new();
        scope
            .set_context("component", "scope")
            .set_context("region", "eu")
            .set_request("url", "/scope")
            .set_user([("id", 1), ("role", 2)].into_iter().collect());
        let options = NoticeOptions {
            context: [("component", "call")].into_iter().collect(),
            user: Some([("id", 99)].into_iter().collect()),
            request: [("url", "/call")].into_iter().collect(),
            ..Default::default()
        };

        let notice = build(&options, &scope, &Config::default());

        assert_eq!(notice.context()["component"], "call");
        assert_eq!(notice.context()["region"], "eu");
        assert_eq!(notice.request()["url"], "/call");
        // User is replaced as a whole, not merged
        assert_eq!(JsonValue::Object(notice.user().clone()), json!({"id": 99}));
    }

    #[test]
    fn test_scope_user_used_without_call_user() {
        let mut scope = Scope::new();
        scope.set_user([("email", "a@b.c")].into_iter().collect());

        let notice = build(&NoticeOptions::default(), &scope, &Config::default());

        assert_eq!(notice.user()["email"], "a@b.c");
    }

    #[test]
    fn test_sections_are_sanitized() {
        let options = NoticeOptions {
            context: [("api_key", "k"), ("ok", "v")].into_iter().collect(),
            user: Some([("password", "p")].into_iter().collect()),
            request: [("authorization", "Bearer x")].into_iter().collect(),
            ..Default::default()
        };

        let notice = build(&options, &Scope::new(), &Config::default());

        assert_eq!(notice.context()["api_key"], "[FILTERED]");
        assert_eq!(notice.context()["ok"], "v");
        assert_eq!(notice.user()["password"], "[FILTERED]");
        assert_eq!(notice.request()["authorization"], "[FILTERED]");
    }

    #[test]
    fn test_request_and_user_toggles() {
        let options = NoticeOptions {
            user: Some([("id", 1)].into_iter().collect()),
            request: [("url", "/"), ("session", "abc")].into_iter().collect(),
            ..Default::default()
        };

        let config = Config {
            filter_session: true,
            ..Default::default()
        };
        let notice = build(&options, &Scope::new(), &config);
        assert!(notice.request().contains_key("url"));
        assert!(!notice.request().contains_key("session"));

        let config = Config {
            send_request_data: false,
            send_user_data: false,
            ..Default::default()
        };
        let notice = build(&options, &Scope::new(), &config);
        assert!(notice.request().is_empty());
        assert!(notice.user().is_empty());
    }

    #[test]
    #[serial]
    fn test_environment_variables_are_captured_and_sanitized() {
        std::env::set_var("FAULTLINE_NOTICE_TEST_TOKEN", "t0ps3cret");
        std::env::set_var("FAULTLINE_NOTICE_TEST_PLAIN", "visible");
        let config = Config {
            send_environment: true,
            ..Default::default()
        };

        let notice = build(&NoticeOptions::default(), &Scope::new(), &config);
        std::env::remove_var("FAULTLINE_NOTICE_TEST_TOKEN");
        std::env::remove_var("FAULTLINE_NOTICE_TEST_PLAIN");

        let variables = &notice.context()[ENVIRONMENT_VARIABLES_KEY];
        assert_eq!(variables["FAULTLINE_NOTICE_TEST_TOKEN"], "[FILTERED]");
        assert_eq!(variables["FAULTLINE_NOTICE_TEST_PLAIN"], "visible");

        let notice = build(&NoticeOptions::default(), &Scope::new(), &Config::default());
        assert!(!notice.context().contains_key(ENVIRONMENT_VARIABLES_KEY));
    }

    #[test]
    #[serial]
    #[cfg(unix)]
    fn test_non_utf8_environment_values_do_not_abort_the_build() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        std::env::set_var("FAULTLINE_NOTICE_TEST_BYTES", OsStr::from_bytes(&[0xff, 0xfe]));
        std::env::set_var(OsStr::from_bytes(&[0x46, 0xff]), "odd name");
        let config = Config {
            send_environment: true,
            ..Default::default()
        };

        let notice = build(&NoticeOptions::default(), &Scope::new(), &config);
        std::env::remove_var("FAULTLINE_NOTICE_TEST_BYTES");
        std::env::remove_var(OsStr::from_bytes(&[0x46, 0xff]));

        let variables = notice.context()[ENVIRONMENT_VARIABLES_KEY].as_object().unwrap();
        assert_eq!(variables["FAULTLINE_NOTICE_TEST_BYTES"], "\u{fffd}\u{fffd}");
        assert!(variables.keys().all(|name| !name.contains('\u{fffd}')));
    }

    #[test]
    fn test_every_string_field_is_bounded() {
        let long = "x".repeat(20_000);
        let options = NoticeOptions {
            fingerprint: Some(long.clone()),
            tags: vec![long.clone(), "short".to_string()],
            ..Default::default()
        };

        let notice = Notice::build(
            &Exception::new(long.clone(), "boom"),
            &[Frame::new(long.clone(), 1).with_location("src/lib.rs", 3)],
            &options,
            &Scope::new(),
            &Config::default(),
        );

        let bounded = |s: &str| s.chars().count() == MAX_STRING_LENGTH + 3 && s.ends_with("...");
        assert!(bounded(notice.error_class()));
        assert!(bounded(notice.fingerprint().unwrap()));
        assert!(bounded(&notice.tags()[0]));
        assert_eq!(notice.tags()[1], "short");
        assert!(bounded(&notice.backtrace()[0]));
        assert!(notice.backtrace()[0].starts_with("src/lib.rs:3 in xxx"));

        let notice = notice
            .with_fingerprint(long.clone())
            .with_tags(vec![long.clone()]);
        assert!(bounded(notice.fingerprint().unwrap()));
        assert!(bounded(&notice.tags()[0]));
    }

    #[test]
    fn test_depth_and_cycle_bounds_apply_per_section() {
        // Nine nested maps put the leaf at depth 10 below the section
        let innermost: Map = [("leaf", "bottom")].into_iter().collect();
        let nested = (0..8).fold(innermost, |inner, _| [("next", inner)].into_iter().collect());
        let options = NoticeOptions {
            context: [("nested", nested.clone())].into_iter().collect(),
            user: Some([("nested", nested)].into_iter().collect()),
            ..Default::default()
        };

        let notice = build(&options, &Scope::new(), &Config::default());

        for section in [notice.context(), notice.user()] {
            let mut value = &section["nested"];
            for _ in 0..8 {
                value = &value["next"];
            }
            assert_eq!(value["leaf"], "bottom");
            let rendered = JsonValue::Object(section.clone()).to_string();
            assert!(!rendered.contains("[CIRCULAR]"));
            assert!(!rendered.contains("[DEPTH]"));
        }
    }

    #[test]
    fn test_payload_layout() {
        let config = Config {
            environment_name: "staging".to_string(),
            app_name: "billing".to_string(),
            ..Default::default()
        };
        let options = NoticeOptions {
            context: [("component", "worker")].into_iter().collect(),
            fingerprint: Some("group-1".to_string()),
            tags: vec!["critical".to_string()],
            ..Default::default()
        };
        let notice = Notice::build(
            &Exception::new("RuntimeError", "boom"),
            &[Frame::new("run", 0).with_location("src/lib.rs", 3)],
            &options,
            &Scope::new(),
            &config,
        );

        let payload = notice.to_payload();

        assert_eq!(payload["error"]["class"], "RuntimeError");
        assert_eq!(payload["error"]["message"], "boom");
        assert_eq!(payload["error"]["backtrace"], json!(["src/lib.rs:3 in run/0"]));
        assert_eq!(payload["error"]["fingerprint"], "group-1");
        assert_eq!(payload["error"]["tags"], json!(["critical"]));
        assert_eq!(
            payload["error"]["occurred_at"].as_str(),
            Some(notice.occurred_at())
        );
        assert_eq!(
            payload["context"],
            json!({"component": "worker", "environment": "staging"})
        );
        assert_eq!(payload["notifier"]["name"], "faultline-rust");
        assert_eq!(payload["notifier"]["language"], "rust");
        assert_eq!(payload["notifier"]["version"], NOTIFIER_VERSION);
        assert_eq!(payload["notifier"]["app_name"], "billing");
        assert!(payload["notifier"].get("revision").is_none());
        assert!(payload.get("request").is_none());
        assert!(payload.get("user").is_none());
    }

    #[test]
    fn test_payload_omits_optional_error_fields() {
        let payload = build(&NoticeOptions::default(), &Scope::new(), &Config::default())
            .to_payload();

        assert!(payload["error"].get("fingerprint").is_none());
        assert!(payload["error"].get("tags").is_none());
        assert_eq!(payload["context"], json!({"environment": "production"}));
    }

    #[test]
    fn test_occurred_at_is_rfc3339_utc() {
        let notice = build(&NoticeOptions::default(), &Scope::new(), &Config::default());
        let parsed = chrono::DateTime::parse_from_rfc3339(notice.occurred_at()).unwrap();
        assert_eq!(parsed.offset().local_minus_utc(), 0);
        assert!(notice.occurred_at().ends_with('Z'));
    }

    #[test]
    fn test_with_helpers() {
        let notice = build(&NoticeOptions::default(), &Scope::new(), &Config::default())
            .with_fingerprint("fp")
            .with_tags(vec!["a".to_string()])
            .with_message("replaced");

        assert_eq!(notice.fingerprint(), Some("fp"));
        assert_eq!(notice.tags(), &["a".to_string()]);
        assert_eq!(notice.message(), "replaced");
    }
}
