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

use std::any::type_name;
use std::sync::Arc;

use tokio::task::JoinError;
use tracing::{debug, error, trace, warn};

use crate::network::Connection;
use crate::protocol::{
    Direction, Message, CONTENT_LENGTH, ERROR_CONTENT_TYPE, METHOD, SESSION,
};
use crate::request::{MethodHandler, MethodRegistry, SessionDirective};
use crate::service::{BoxFuture, Payload, PipelineStage};
use crate::session::{Session, SessionStore};
use crate::{AppError, AppResult};

/// A decoded request after its `Session` header has been acted on.
#[derive(Debug)]
pub struct ResolvedRequest {
    pub request: Message,
    pub directive: SessionDirective,
    pub session: Option<Arc<Session>>,
    /// value echoed in the response's `Session` header
    pub session_header: String,
    /// set when the request must be answered with an error instead of a handler call
    pub rejected: Option<AppError>,
}

/// Raw frame bytes to [`Message`]. Both directions decode, a `res` frame is turned
/// away by the later stages with an error response.
#[derive(Debug, Default)]
pub struct DecodeStage;

impl DecodeStage {
    pub const NAME: &'static str = "decode";
}

impl PipelineStage for DecodeStage {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn process<'a>(
        &'a self,
        _connection: &'a mut Connection,
        input: Payload,
    ) -> BoxFuture<'a, AppResult<Payload>> {
        Box::pin(async move {
            match input {
                Payload::Raw(bytes) => Ok(Payload::Request(Message::decode(&bytes)?)),
                other => Err(other.unexpected(Self::NAME)),
            }
        })
    }
}

/// Applies the request's session directive against the store.
///
/// `*` creates a session and rewrites the request's `Session` header to the new
/// token. A token that names no live session resolves to no session, not an error.
#[derive(Debug)]
pub struct SessionStage {
    sessions: Arc<SessionStore>,
}

impl SessionStage {
    pub const NAME: &'static str = "session";

    pub fn new(sessions: Arc<SessionStore>) -> Self {
        SessionStage { sessions }
    }

    pub fn resolve(&self, mut request: Message) -> ResolvedRequest {
        if request.direction() != Direction::Request {
            let rejected = AppError::UnexpectedDirection(request.direction().to_string());
            return ResolvedRequest {
                request,
                directive: SessionDirective::NoSession,
                session: None,
                session_header: SessionDirective::NO_SESSION.to_string(),
                rejected: Some(rejected),
            };
        }

        let directive = SessionDirective::parse(request.session());
        let mut rejected = None;
        let (session, session_header) = match &directive {
            SessionDirective::Create => match self.sessions.create_session() {
                Ok(session) => {
                    let token = session.token().to_string();
                    request.set_header(SESSION, &token);
                    (Some(session), token)
                }
                Err(err) => {
                    rejected = Some(err);
                    (None, SessionDirective::NO_SESSION.to_string())
                }
            },
            SessionDirective::NoSession => (None, SessionDirective::NO_SESSION.to_string()),
            SessionDirective::Use(token) | SessionDirective::CloseAfterUse(token) => {
                let session = self.sessions.get(token);
                if session.is_none() {
                    trace!("no live session for token={}", token);
                }
                (session, token.clone())
            }
        };
        ResolvedRequest {
            request,
            directive,
            session,
            session_header,
            rejected,
        }
    }
}

impl PipelineStage for SessionStage {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn process<'a>(
        &'a self,
        _connection: &'a mut Connection,
        input: Payload,
    ) -> BoxFuture<'a, AppResult<Payload>> {
        Box::pin(async move {
            match input {
                Payload::Request(request) => Ok(Payload::Resolved(self.resolve(request))),
                other => Err(other.unexpected(Self::NAME)),
            }
        })
    }
}

/// Calls the registered handler, writes the encoded response, then honours a
/// close-after-use directive.
///
/// Unknown or missing methods and panicking handlers still produce a response frame
/// with content type `error`, so the client always gets an answer once a request has
/// been decoded.
#[derive(Debug)]
pub struct DispatchStage {
    sessions: Arc<SessionStore>,
    methods: Arc<MethodRegistry>,
}

impl DispatchStage {
    pub const NAME: &'static str = "dispatch";

    pub fn new(sessions: Arc<SessionStore>, methods: Arc<MethodRegistry>) -> Self {
        DispatchStage { sessions, methods }
    }

    /// Builds the response for `resolved` without touching the connection.
    pub async fn dispatch(&self, resolved: &ResolvedRequest) -> Message {
        let mut response = Message::response();
        response.set_header(SESSION, &resolved.session_header);

        if let Some(err) = &resolved.rejected {
            warn!("rejecting request: {}", err);
            let method = resolved.request.method().unwrap_or("");
            return error_response(response, method, err);
        }

        let method = match resolved.request.method() {
            Some(method) => method.to_string(),
            None => {
                let err = AppError::MissingHeader(METHOD.to_string());
                warn!("rejecting request: {}", err);
                return error_response(response, "", &err);
            }
        };
        let handler = match self.methods.lookup(&method) {
            Ok(handler) => handler,
            Err(err) => {
                warn!("rejecting request: {}", err);
                return error_response(response, &method, &err);
            }
        };

        let session_header = resolved.session_header.clone();
        match invoke(
            handler,
            resolved.request.clone(),
            response,
            resolved.session.clone(),
        )
        .await
        {
            Ok(mut response) => {
                if response.header(CONTENT_LENGTH).is_none() {
                    warn!(
                        "handler for {} left out Content-Length, filling it in",
                        method
                    );
                    response.set_header(CONTENT_LENGTH, response.body().len());
                }
                response
            }
            Err(err) => {
                error!("{}", err);
                let mut response = Message::response();
                response.set_header(SESSION, session_header);
                error_response(response, &method, &err)
            }
        }
    }
}

impl PipelineStage for DispatchStage {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn process<'a>(
        &'a self,
        connection: &'a mut Connection,
        input: Payload,
    ) -> BoxFuture<'a, AppResult<Payload>> {
        Box::pin(async move {
            let resolved = match input {
                Payload::Resolved(resolved) => resolved,
                other => return Err(other.unexpected(Self::NAME)),
            };

            let response = self.dispatch(&resolved).await;
            let sent = connection.write_all(&response.encode()).await;

            // the client asked for the session to end with this request
            if let SessionDirective::CloseAfterUse(token) = &resolved.directive {
                self.sessions.close(token);
            }
            sent?;

            debug!(
                "connection {} answered {} with {} body bytes",
                connection.connection_id,
                response.method().unwrap_or(""),
                response.body().len()
            );
            Ok(Payload::Exchange {
                request: resolved.request,
                response,
            })
        })
    }
}

/// Runs the handler on the blocking pool; a panic comes back as `HandlerPanicked`.
async fn invoke(
    handler: Arc<dyn MethodHandler>,
    request: Message,
    mut response: Message,
    session: Option<Arc<Session>>,
) -> AppResult<Message> {
    let outcome = tokio::task::spawn_blocking(move || {
        handler.handle(&request, &mut response, session.as_deref());
        response
    })
    .await;
    outcome.map_err(|join_error| AppError::HandlerPanicked(panic_message(join_error)))
}

fn panic_message(join_error: JoinError) -> String {
    if !join_error.is_panic() {
        return join_error.to_string();
    }
    let payload = join_error.into_panic();
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        format!("panic with an unknown type: {}", type_name_of(&payload))
    }
}

fn type_name_of<T>(_: &T) -> &'static str {
    type_name::<T>()
}

fn error_response(mut response: Message, method: &str, err: &AppError) -> Message {
    response.set_header(METHOD, method);
    response.set_content(ERROR_CONTENT_TYPE, err.to_string());
    response
}
