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

use tokio::sync::broadcast;

/// Sending half of the server-wide shutdown broadcast.
///
/// Every long-lived task (eviction sweep, keep-alive connection loops) holds a
/// [`Shutdown`] subscribed from this notifier.
#[derive(Debug, Clone)]
pub struct ShutdownNotifier {
    sender: broadcast::Sender<()>,
}

impl ShutdownNotifier {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1);
        ShutdownNotifier { sender }
    }

    pub fn subscribe(&self) -> Shutdown {
        Shutdown::new(self.sender.subscribe())
    }

    /// Returns the number of tasks that were listening.
    pub fn notify(&self) -> usize {
        // no receivers left is not an error during shutdown
        self.sender.send(()).unwrap_or(0)
    }
}

impl Default for ShutdownNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct Shutdown {
    is_shutdown: bool,
    notify: broadcast::Receiver<()>,
}

impl Shutdown {
    pub fn new(notify: broadcast::Receiver<()>) -> Shutdown {
        Shutdown {
            is_shutdown: false,
            notify,
        }
    }
    pub fn is_shutdown(&self) -> bool {
        self.is_shutdown
    }

    /// Waits for the shutdown signal. A dropped notifier counts as a signal.
    pub async fn recv(&mut self) {
        if self.is_shutdown {
            return;
        }
        let _ = self.notify.recv().await;
        self.is_shutdown = true;
    }
}
