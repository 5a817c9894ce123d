// Copyright (c) 2026 Loom Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Coalesces consecutive agent "thinking" chunks into one unit per
//! reasoning burst via a short inactivity timer. No block detection — a
//! thought is never structured markdown.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::sleep;

pub type ThoughtFlushSink = Arc<dyn Fn(String) + Send + Sync>;

#[derive(Debug, Clone, Copy)]
pub struct ThoughtBufferConfig {
    pub inactivity_timeout: Duration,
}

impl Default for ThoughtBufferConfig {
    fn default() -> Self {
        Self { inactivity_timeout: Duration::from_millis(150) }
    }
}

struct State {
    buf: String,
    generation: u64,
}

pub struct ThoughtBuffer {
    state: Mutex<State>,
    config: ThoughtBufferConfig,
    on_flush: ThoughtFlushSink,
}

impl ThoughtBuffer {
    pub fn new(config: ThoughtBufferConfig, on_flush: ThoughtFlushSink) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State { buf: String::new(), generation: 0 }),
            config,
            on_flush,
        })
    }

    pub fn write(self: &Arc<Self>, chunk: &str) {
        let generation = {
            let mut st = self.state.lock().unwrap();
            st.buf.push_str(chunk);
            st.generation += 1;
            st.generation
        };
        self.schedule_timer(generation);
    }

    fn schedule_timer(self: &Arc<Self>, generation: u64) {
        let this = Arc::clone(self);
        let timeout = this.config.inactivity_timeout;
        tokio::spawn(async move {
            sleep(timeout).await;
            let stale = {
                let st = this.state.lock().unwrap();
                st.generation != generation
            };
            if !stale {
                this.force_flush();
            }
        });
    }

    /// Unconditional flush, invoked on the first non-thought event or on
    /// inactivity timeout.
    pub fn force_flush(self: &Arc<Self>) {
        let text = {
            let mut st = self.state.lock().unwrap();
            if st.buf.is_empty() {
                return;
            }
            std::mem::take(&mut st.buf)
        };
        (self.on_flush)(text);
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().unwrap().buf.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn collecting_sink() -> (ThoughtFlushSink, Arc<StdMutex<Vec<String>>>) {
        let out: Arc<StdMutex<Vec<String>>> = Arc::new(StdMutex::new(Vec::new()));
        let out2 = Arc::clone(&out);
        (Arc::new(move |t: String| out2.lock().unwrap().push(t)), out)
    }

    #[tokio::test]
    async fn coalesces_multiple_writes_before_force_flush() {
        let (sink, out) = collecting_sink();
        let buf = ThoughtBuffer::new(ThoughtBufferConfig::default(), sink);
        buf.write("thinking ");
        buf.write("about it");
        buf.force_flush();
        assert_eq!(out.lock().unwrap().as_slice(), ["thinking about it"]);
    }

    #[tokio::test]
    async fn force_flush_on_empty_buffer_is_noop() {
        let (sink, out) = collecting_sink();
        let buf = ThoughtBuffer::new(ThoughtBufferConfig::default(), sink);
        buf.force_flush();
        assert!(out.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn inactivity_timer_flushes_without_explicit_force() {
        let (sink, out) = collecting_sink();
        let buf = ThoughtBuffer::new(
            ThoughtBufferConfig { inactivity_timeout: Duration::from_millis(20) },
            sink,
        );
        buf.write("hmm");
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(out.lock().unwrap().as_slice(), ["hmm"]);
    }
}
