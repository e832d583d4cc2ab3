//! Simulated asynchronous platform shared by the integration tests.
//!
//! Events are delivered from background threads after a delay, the way a real
//! platform calls back into a client from its own threads.

#![allow(dead_code)]

use std::thread::{self, JoinHandle};
use std::time::Duration;

use platform_conformance::callbacks::{Client, PlatformEvent, SslDecision};
use platform_conformance::core::config::HarnessConfig;
use platform_conformance::sync::latch::Latch;

/// Config with short budgets so failing paths finish quickly.
pub fn fast_config() -> HarnessConfig {
    let mut cfg = HarnessConfig::default();
    cfg.timeouts.poll_timeout_ms = 1000;
    cfg.timeouts.poll_interval_ms = 50;
    cfg.timeouts.latch_timeout_ms = 1000;
    cfg.timeouts.action_timeout_ms = 2000;
    cfg.capabilities.features = vec!["webview".to_string(), "microphone".to_string()];
    cfg
}

/// Run `f` on a fresh thread after `delay`.
pub fn after(delay: Duration, f: impl FnOnce() + Send + 'static) -> JoinHandle<()> {
    thread::spawn(move || {
        thread::sleep(delay);
        f();
    })
}

/// A fake web view that loads pages by emitting callbacks from a worker thread.
pub struct FakeWebView {
    client: Client,
    step: Duration,
}

impl FakeWebView {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            step: Duration::from_millis(10),
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Start a load: started, progress in quarters, finished.
    pub fn load_url(&self, url: &str) -> JoinHandle<()> {
        let client = self.client.clone();
        let url = url.to_string();
        let step = self.step;
        thread::spawn(move || {
            client.dispatch(&PlatformEvent::PageStarted { url: url.clone() });
            for percent in [25_u8, 50, 75, 100] {
                thread::sleep(step);
                client.dispatch(&PlatformEvent::ProgressChanged { percent });
            }
            client.dispatch(&PlatformEvent::PageFinished { url });
        })
    }

    /// Simulate an SSL challenge and complete `decision` with the client's answer.
    pub fn challenge(&self, host: &str, decision: Latch<SslDecision>) -> JoinHandle<()> {
        let client = self.client.clone();
        let host = host.to_string();
        let step = self.step;
        thread::spawn(move || {
            thread::sleep(step);
            let answer = client
                .dispatch(&PlatformEvent::SslChallenge { host })
                .unwrap_or_default();
            decision.complete(answer);
        })
    }

    /// Simulate a pinch zoom.
    pub fn zoom(&self, old: f32, new: f32) -> JoinHandle<()> {
        let client = self.client.clone();
        let step = self.step;
        thread::spawn(move || {
            thread::sleep(step);
            client.dispatch(&PlatformEvent::ScaleChanged { old, new });
        })
    }
}
