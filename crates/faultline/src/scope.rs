// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::value::{Map, Value};

/// Ambient data attached to every notice captured with this scope.
///
/// A scope is owned by whoever handles a unit of work (a request handler, a job runner) and
/// passed explicitly to each capture call. Values given at capture time take precedence over
/// the scope.
///
/// Cloning a scope copies its top-level entries, so setters on the clone do not leak back.
#[derive(Debug, Default)]
pub struct Scope {
    context: Map,
    user: Option<Map>,
    request: Map,
}

impl Scope {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces one context entry
    pub fn set_context(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.context.insert(key.into(), value);
        self
    }

    pub fn set_user(&mut self, user: Map) -> &mut Self {
        self.user = Some(user);
        self
    }

    /// Adds or replaces one request entry
    pub fn set_request(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.request.insert(key.into(), value);
        self
    }

    /// Forgets everything, typically at the end of a unit of work
    pub fn clear(&mut self) {
        self.context = Map::new();
        self.user = None;
        self.request = Map::new();
    }

    #[must_use]
    pub fn context(&self) -> &Map {
        &self.context
    }

    #[must_use]
    pub fn user(&self) -> Option<&Map> {
        self.user.as_ref()
    }

    #[must_use]
    pub fn request(&self) -> &Map {
        &self.request
    }
}

impl Clone for Scope {
    fn clone(&self) -> Self {
        Self {
            context: self.context.entries().into_iter().collect(),
            user: self.user.clone(),
            request: self.request.entries().into_iter().collect(),
        }
    }
}
