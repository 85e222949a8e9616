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

/// Listens for the broker shutdown signal.
///
/// Only a single value is ever sent on the broadcast channel; once received,
/// the `Shutdown` stays in the shut-down state and `recv` returns immediately.
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

    pub async fn recv(&mut self) {
        if self.is_shutdown {
            return;
        }
        let _ = self.notify.recv().await;
        self.is_shutdown = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recv_latches_shutdown_state() {
        let (notify_shutdown, _) = broadcast::channel(1);
        let mut shutdown = Shutdown::new(notify_shutdown.subscribe());
        assert!(!shutdown.is_shutdown());

        notify_shutdown.send(()).unwrap();
        shutdown.recv().await;
        assert!(shutdown.is_shutdown());

        // a second recv must not wait for another signal
        shutdown.recv().await;
        assert!(shutdown.is_shutdown());
    }
}
