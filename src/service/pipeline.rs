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

//! Per-connection processing pipeline.
//!
//! A connection first goes through a [`MessageReceiver`], whose bytes are then fed
//! through every registered [`PipelineStage`] in order, each stage consuming the
//! previous stage's [`Payload`]. The [`ConnectionCloser`] runs last.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use tracing::trace;

use crate::network::Connection;
use crate::protocol::Message;
use crate::request::ResolvedRequest;
use crate::{AppError, AppResult};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// What flows between two pipeline stages.
#[derive(Debug)]
pub enum Payload {
    /// bytes as produced by the receiver
    Raw(Bytes),
    /// decoded message
    Request(Message),
    /// message with its session directive applied
    Resolved(ResolvedRequest),
    /// request together with the response that was sent for it
    Exchange { request: Message, response: Message },
}

impl Payload {
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Raw(_) => "raw",
            Payload::Request(_) => "request",
            Payload::Resolved(_) => "resolved",
            Payload::Exchange { .. } => "exchange",
        }
    }

    /// Error for a stage handed a payload it cannot consume.
    pub fn unexpected(&self, stage: &str) -> AppError {
        AppError::IllegalState(format!(
            "stage {} cannot process a {} payload",
            stage,
            self.kind()
        ))
    }
}

pub trait PipelineStage: Send + Sync {
    /// Unique name, used by [`Pipeline::remove_stage`].
    fn name(&self) -> &str;

    fn process<'a>(
        &'a self,
        connection: &'a mut Connection,
        input: Payload,
    ) -> BoxFuture<'a, AppResult<Payload>>;
}

/// How the bytes of one message are pulled off a connection.
pub trait MessageReceiver: Send + Sync {
    /// `Ok(None)` when the peer closed without sending anything.
    fn receive<'a>(&'a self, connection: &'a mut Connection)
        -> BoxFuture<'a, AppResult<Option<Bytes>>>;
}

/// What happens to a connection once the pipeline is done with it.
pub trait ConnectionCloser: Send + Sync {
    fn close<'a>(&'a self, connection: &'a mut Connection) -> BoxFuture<'a, AppResult<()>>;
}

/// Default receiver: a single read of at most `chunk_size` bytes.
#[derive(Debug, Clone)]
pub struct ChunkReceiver {
    chunk_size: usize,
}

impl ChunkReceiver {
    pub fn new(chunk_size: usize) -> Self {
        ChunkReceiver { chunk_size }
    }
}

impl MessageReceiver for ChunkReceiver {
    fn receive<'a>(
        &'a self,
        connection: &'a mut Connection,
    ) -> BoxFuture<'a, AppResult<Option<Bytes>>> {
        Box::pin(connection.read_chunk(self.chunk_size))
    }
}

/// Default closer: flush and shut the write side down.
#[derive(Debug, Clone, Default)]
pub struct ShutdownCloser;

impl ConnectionCloser for ShutdownCloser {
    fn close<'a>(&'a self, connection: &'a mut Connection) -> BoxFuture<'a, AppResult<()>> {
        Box::pin(connection.shutdown())
    }
}

/// Ordered list of stages. Meant to be assembled before the server starts.
#[derive(Default, Clone)]
pub struct Pipeline {
    stages: Vec<Arc<dyn PipelineStage>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_stage(&mut self, stage: Arc<dyn PipelineStage>) {
        self.stages.push(stage);
    }

    /// Removes the first stage called `name`. Returns whether one was found.
    pub fn remove_stage(&mut self, name: &str) -> bool {
        match self.stages.iter().position(|stage| stage.name() == name) {
            Some(index) => {
                self.stages.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn stage_names(&self) -> Vec<String> {
        self.stages
            .iter()
            .map(|stage| stage.name().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Runs every stage in order. The first failing stage ends the run.
    pub async fn run(&self, connection: &mut Connection, input: Bytes) -> AppResult<Payload> {
        let mut payload = Payload::Raw(input);
        for stage in &self.stages {
            trace!(
                "connection {} stage {} <- {}",
                connection.connection_id,
                stage.name(),
                payload.kind()
            );
            payload = stage.process(connection, payload).await?;
        }
        Ok(payload)
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.stage_names()).finish()
    }
}
