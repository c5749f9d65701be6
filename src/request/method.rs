// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::protocol::Message;
use crate::session::Session;
use crate::{AppError, AppResult};

/// Business logic behind one method name.
///
/// The handler fills in `response` in place, including `Content-Length`, `Method`
/// and a content type header. `session` is `None` when the request's directive did
/// not resolve to a live session. Handlers run on the blocking thread pool, so they
/// may block on I/O.
pub trait MethodHandler: Send + Sync + 'static {
    fn handle(&self, request: &Message, response: &mut Message, session: Option<&Session>);
}

impl<F> MethodHandler for F
where
    F: Fn(&Message, &mut Message, Option<&Session>) + Send + Sync + 'static,
{
    fn handle(&self, request: &Message, response: &mut Message, session: Option<&Session>) {
        self(request, response, session)
    }
}

/// Method name to handler. Registering a name twice keeps the last handler.
#[derive(Default)]
pub struct MethodRegistry {
    methods: RwLock<HashMap<String, Arc<dyn MethodHandler>>>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if an earlier handler was replaced.
    pub fn register(&self, name: impl Into<String>, handler: Arc<dyn MethodHandler>) -> bool {
        let name = name.into();
        let replaced = self.methods.write().insert(name.clone(), handler).is_some();
        if replaced {
            debug!("method {} re-registered, previous handler replaced", name);
        } else {
            debug!("method {} registered", name);
        }
        replaced
    }

    pub fn lookup(&self, name: &str) -> AppResult<Arc<dyn MethodHandler>> {
        self.methods
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| AppError::UnknownMethod(name.to_string()))
    }

    pub fn method_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.methods.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.methods.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.read().is_empty()
    }
}

impl std::fmt::Debug for MethodRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodRegistry")
            .field("methods", &self.method_names())
            .finish()
    }
}
