// Copyright (c) 2026 Loom Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Block-aware markdown accumulation and flush scheduling.
//!
//! Accepts a stream of text chunks and emits rendered HTML fragments such
//! that no fragment contains a broken markdown structure — a half-open
//! fence, list, table, or unmatched inline emphasis/backticks — unless the
//! hard inactivity timeout has elapsed and releases it anyway (a deliberate,
//! bounded loss of intactness rather than unbounded latency).

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::sleep;

use crate::render;

/// Flush sink invoked with the rendered HTML of one flushed unit.
///
/// Invoked while the buffer's internal lock is held; implementations must
/// not call back into the same [`MarkdownBuffer`] instance.
pub type FlushSink = Arc<dyn Fn(String) + Send + Sync>;

#[derive(Debug, Clone, Copy)]
pub struct MarkdownBufferConfig {
    pub soft_timeout: Duration,
    pub hard_timeout: Duration,
    pub soft_cap: usize,
    pub hard_cap: usize,
}

impl Default for MarkdownBufferConfig {
    fn default() -> Self {
        Self {
            soft_timeout: Duration::from_millis(200),
            hard_timeout: Duration::from_secs(2),
            soft_cap: 4 * 1024,
            hard_cap: 64 * 1024,
        }
    }
}

struct State {
    buf: String,
    in_code_block: bool,
    in_list: bool,
    in_table: bool,
    saw_blank_line: bool,
    hard_timer_armed: bool,
    /// Bumped on every write; a pending soft-timer task compares this to the
    /// generation it was scheduled under and no-ops if it has gone stale.
    generation: u64,
}

impl State {
    fn new() -> Self {
        Self {
            buf: String::new(),
            in_code_block: false,
            in_list: false,
            in_table: false,
            saw_blank_line: false,
            hard_timer_armed: false,
            generation: 0,
        }
    }

    fn in_block(&self) -> bool {
        self.in_code_block || self.in_list || self.in_table
    }

    fn reset_after_flush(&mut self) {
        self.buf.clear();
        self.in_list = false;
        self.in_table = false;
        self.saw_blank_line = false;
        self.hard_timer_armed = false;
        // in_code_block deliberately NOT reset here: a flush triggered mid
        // fence (safety valve) must remember it is still inside the fence.
    }
}

pub struct MarkdownBuffer {
    state: Mutex<State>,
    config: MarkdownBufferConfig,
    on_flush: FlushSink,
}

impl MarkdownBuffer {
    pub fn new(config: MarkdownBufferConfig, on_flush: FlushSink) -> Arc<Self> {
        Arc::new(Self { state: Mutex::new(State::new()), config, on_flush })
    }

    /// Append a chunk of agent text, possibly triggering an immediate flush
    /// and (re)scheduling the soft/hard timers.
    pub fn write(self: &Arc<Self>, chunk: &str) {
        let (should_flush_now, arm_hard_timer, generation) = {
            let mut st = self.state.lock().unwrap();
            let was_empty = st.buf.is_empty();
            let prev_len = st.buf.len();
            let was_in_block = st.in_block();
            st.buf.push_str(chunk);
            st.generation += 1;

            reclassify_lines(&mut st, prev_len);

            let mut flush_now = false;

            // A fence/list/table that just closed is a block boundary on its
            // own, independent of what follows it.
            if was_in_block && !st.in_block() {
                flush_now = true;
            }

            // Double newline outside a list: block boundary, flush.
            if !flush_now && !st.in_list && ends_with_double_newline(&st.buf) && !st.buf.trim().is_empty() {
                st.in_table = false;
                flush_now = true;
            }

            // Size-driven flush.
            if !flush_now
                && !st.in_block()
                && st.buf.len() >= self.config.soft_cap
                && st.buf.ends_with('\n')
                && is_inline_balanced(&st.buf)
            {
                flush_now = true;
            }

            // Hard cap safety valve: flush unconditionally.
            if !flush_now && st.buf.len() >= self.config.hard_cap {
                flush_now = true;
            }

            let arm_hard = was_empty && !st.buf.is_empty() && !st.hard_timer_armed;
            if arm_hard {
                st.hard_timer_armed = true;
            }

            (flush_now, arm_hard, st.generation)
        };

        if should_flush_now {
            self.flush();
        } else {
            self.schedule_soft_timer(generation);
            if arm_hard_timer {
                self.schedule_hard_timer();
            }
        }
    }

    fn schedule_soft_timer(self: &Arc<Self>, generation: u64) {
        let this = Arc::clone(self);
        let timeout = this.config.soft_timeout;
        tokio::spawn(async move {
            sleep(timeout).await;
            let is_stale = {
                let st = this.state.lock().unwrap();
                st.generation != generation
            };
            if is_stale {
                return;
            }
            this.safe_flush();
        });
    }

    fn schedule_hard_timer(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let timeout = this.config.hard_timeout;
        tokio::spawn(async move {
            sleep(timeout).await;
            let should_release = {
                let st = this.state.lock().unwrap();
                st.hard_timer_armed && !st.buf.is_empty()
            };
            if !should_release {
                return;
            }
            // The hard timer's job is to unstick a paused agent even if the
            // buffer is mid-fence/mid-list/unbalanced. Try the safe path
            // first; if the structure really is broken, release it anyway
            // through the escaped fallback rather than hold it forever.
            if !this.safe_flush() {
                this.force_release_unsafe();
            }
        });
    }

    /// Reports whether the buffer is currently inside a structured block.
    pub fn in_block(&self) -> bool {
        self.state.lock().unwrap().in_block()
    }

    /// Flush only if currently safe; returns whether a flush happened.
    pub fn safe_flush(self: &Arc<Self>) -> bool {
        let safe = {
            let st = self.state.lock().unwrap();
            !st.in_block() && (st.buf.is_empty() || st.buf.ends_with('\n')) && is_inline_balanced(&st.buf)
        };
        if safe {
            self.flush();
        }
        safe
    }

    /// Unconditional flush, regardless of block/balance state.
    pub fn flush(self: &Arc<Self>) {
        let raw = {
            let mut st = self.state.lock().unwrap();
            if st.buf.is_empty() {
                return;
            }
            let raw = apply_list_continuation_joiner(&st.buf);
            st.reset_after_flush();
            raw
        };
        let html = render::render(&raw);
        (self.on_flush)(html);
    }

    /// Unconditional flush used at session/prompt end.
    pub fn close(self: &Arc<Self>) {
        self.flush();
    }

    /// Releases the buffer through the escaped `<pre>` fallback instead of
    /// the markdown renderer. Only the hard-timeout safety valve calls this
    /// — it is the one path where an unbalanced or mid-fence buffer is
    /// deliberately emitted rather than held indefinitely.
    fn force_release_unsafe(self: &Arc<Self>) {
        let raw = {
            let mut st = self.state.lock().unwrap();
            if st.buf.is_empty() {
                return;
            }
            let raw = std::mem::take(&mut st.buf);
            st.reset_after_flush();
            st.in_code_block = false;
            raw
        };
        (self.on_flush)(render::escaped_pre(&raw));
    }
}

fn ends_with_double_newline(buf: &str) -> bool {
    buf.ends_with("\n\n")
}

/// Re-derive `in_code_block`/`in_list`/`in_table`/`saw_blank_line` from
/// every line completed since `prev_len` (the buffer length before the
/// current write). A single `write()` call can deliver more than one
/// newline-terminated line — an entire fenced block, say — and each one
/// must be inspected in order, not just the last, or a block that opens
/// and closes within one chunk never reports itself closed.
fn reclassify_lines(st: &mut State, prev_len: usize) {
    for line in completed_lines_since(&st.buf, prev_len) {
        reclassify_one_line(st, line);
    }
}

fn reclassify_one_line(st: &mut State, line: &str) {
    if is_fence_marker(line) {
        st.in_code_block = !st.in_code_block;
        return;
    }
    if st.in_code_block {
        return;
    }

    if line.trim().is_empty() {
        if st.in_list {
            st.saw_blank_line = true;
        } else {
            st.in_table = false;
        }
        return;
    }

    if is_list_marker(line) {
        st.in_list = true;
        st.saw_blank_line = false;
        return;
    }

    if st.in_list && st.saw_blank_line {
        // Next non-blank line after a blank: list continues only if this
        // line is also a list item (handled above) — otherwise it closes.
        st.in_list = false;
        st.saw_blank_line = false;
    }

    if line.trim_start().starts_with('|') {
        st.in_table = true;
    }
}

/// Every newline-terminated line that became complete between `prev_len`
/// and the buffer's current end, in order. Re-scans from the start of the
/// line straddling `prev_len`, since a write can complete a line that was
/// only partially present before this chunk arrived.
fn completed_lines_since(buf: &str, prev_len: usize) -> impl Iterator<Item = &str> {
    let scan_start = buf[..prev_len].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let region = &buf[scan_start..];
    let mut parts: Vec<&str> = region.split('\n').collect();
    // The final element is whatever follows the last '\n' in `region` — an
    // empty string if `buf` ends with '\n' (nothing dangling), otherwise an
    // incomplete line not yet terminated. Either way it isn't a completed
    // line yet.
    parts.pop();
    parts.into_iter()
}

fn is_fence_marker(line: &str) -> bool {
    line.trim_start().starts_with("```")
}

fn is_list_marker(line: &str) -> bool {
    let t = line.trim_start();
    if let Some(rest) = t.strip_prefix("- ").or_else(|| t.strip_prefix("* ")).or_else(|| t.strip_prefix("+ ")) {
        return !rest.is_empty();
    }
    let digits: String = t.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return false;
    }
    t[digits.len()..].starts_with(". ") || t[digits.len()..].starts_with(") ")
}

/// Whether `**` pairs and bare backticks (outside fences, which are handled
/// separately via `in_code_block`) are balanced in the buffer.
fn is_inline_balanced(buf: &str) -> bool {
    buf.matches("**").count() % 2 == 0 && buf.chars().filter(|&c| c == '`').count() % 2 == 0
}

/// Splices a dangling list-item continuation back into its item when the
/// item ends with unbalanced parens/backticks, is followed by a blank line,
/// and the next line is a plausible continuation (lowercase start, closing
/// paren/backtick, or other low-level punctuation).
///
/// Greedy only until balance is restored or no further candidate lines
/// exist — it never eats more than it must.
fn apply_list_continuation_joiner(raw: &str) -> String {
    let lines: Vec<&str> = raw.split('\n').collect();
    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        if is_list_marker(line) && !is_balanced_line(line) {
            let mut item = line.to_string();
            let mut j = i + 1;
            // Skip exactly one blank line, then pull in continuation lines
            // until balance is restored or the candidate doesn't look like
            // a continuation.
            if j < lines.len() && lines[j].trim().is_empty() {
                let mut k = j + 1;
                while k < lines.len() && looks_like_continuation(lines[k]) && !is_balanced_line(&item) {
                    item.push_str("\n   ");
                    item.push_str(lines[k].trim_start());
                    k += 1;
                    if is_balanced_line(&item) {
                        break;
                    }
                }
                if k > j + 1 {
                    j = k;
                }
            }
            out.push(item);
            i = j;
            continue;
        }
        out.push(line.to_string());
        i += 1;
    }

    out.join("\n")
}

fn is_balanced_line(line: &str) -> bool {
    let opens = line.matches('(').count();
    let closes = line.matches(')').count();
    let ticks = line.chars().filter(|&c| c == '`').count();
    opens == closes && ticks % 2 == 0
}

fn looks_like_continuation(line: &str) -> bool {
    let t = line.trim_start();
    match t.chars().next() {
        Some(c) => c.is_lowercase() || c == ')' || c == '`',
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn collecting_sink() -> (FlushSink, Arc<StdMutex<Vec<String>>>) {
        let out: Arc<StdMutex<Vec<String>>> = Arc::new(StdMutex::new(Vec::new()));
        let out2 = Arc::clone(&out);
        let sink: FlushSink = Arc::new(move |html: String| out2.lock().unwrap().push(html));
        (sink, out)
    }

    #[tokio::test]
    async fn list_not_split_flushes_once_on_blank_line() {
        let (sink, out) = collecting_sink();
        let buf = MarkdownBuffer::new(MarkdownBufferConfig::default(), sink);
        buf.write("1. first\n");
        buf.write("2. second\n");
        buf.write("3. third\n\n");
        assert_eq!(out.lock().unwrap().len(), 1);
        let html = out.lock().unwrap()[0].clone();
        assert_eq!(html.matches("<li>").count(), 3);
    }

    #[tokio::test]
    async fn open_code_fence_does_not_flush_on_blank_line() {
        let (sink, out) = collecting_sink();
        let buf = MarkdownBuffer::new(MarkdownBufferConfig::default(), sink);
        buf.write("```go\n");
        buf.write("func main() {\n");
        buf.write("\n");
        assert!(out.lock().unwrap().is_empty());
        assert!(buf.in_block());
    }

    #[tokio::test]
    async fn closing_fence_flushes_a_single_pre_block() {
        let (sink, out) = collecting_sink();
        let buf = MarkdownBuffer::new(MarkdownBufferConfig::default(), sink);
        buf.write("```go\n");
        buf.write("func main() {}\n");
        buf.write("```\n");
        assert_eq!(out.lock().unwrap().len(), 1);
        assert!(out.lock().unwrap()[0].contains("<pre>"));
    }

    #[tokio::test]
    async fn whole_fenced_block_arriving_in_one_chunk_is_not_left_open() {
        let (sink, out) = collecting_sink();
        let buf = MarkdownBuffer::new(MarkdownBufferConfig::default(), sink);
        buf.write("```go\nfn f(){}\n```\n");
        // Open and close fence markers both land in this single write; a
        // scan of only the last completed line would see just the closing
        // fence, toggle once, and leave the buffer stuck "in block" forever.
        assert!(!buf.in_block());
        assert!(buf.safe_flush());
        assert_eq!(out.lock().unwrap().len(), 1);
        assert!(out.lock().unwrap()[0].contains("<pre>"));
    }

    #[tokio::test]
    async fn coalesces_three_chunks_into_one_flush() {
        let (sink, out) = collecting_sink();
        let buf = MarkdownBuffer::new(MarkdownBufferConfig::default(), sink);
        buf.write("Hello ");
        buf.write("world");
        buf.write("!\n\n");
        assert_eq!(out.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn hard_cap_flushes_regardless_of_balance() {
        let (sink, out) = collecting_sink();
        let cfg = MarkdownBufferConfig { hard_cap: 16, ..MarkdownBufferConfig::default() };
        let buf = MarkdownBuffer::new(cfg, sink);
        buf.write("```\nopen fence that never closes and keeps going");
        assert!(!out.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn safe_flush_noop_while_in_block() {
        let (sink, out) = collecting_sink();
        let buf = MarkdownBuffer::new(MarkdownBufferConfig::default(), sink);
        buf.write("```\nunterminated\n");
        assert!(!buf.safe_flush());
        assert!(out.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn close_flushes_unconditionally() {
        let (sink, out) = collecting_sink();
        let buf = MarkdownBuffer::new(MarkdownBufferConfig::default(), sink);
        buf.write("```\nunterminated\n");
        buf.close();
        assert_eq!(out.lock().unwrap().len(), 1);
    }

    #[test]
    fn list_continuation_joiner_splices_dangling_paren() {
        let raw = "- call foo(bar\n\n    and baz)\n- next item\n";
        let joined = apply_list_continuation_joiner(raw);
        assert!(joined.contains("- call foo(bar\n   and baz)"));
    }

    #[test]
    fn inline_balance_detects_unmatched_double_star() {
        assert!(!is_inline_balanced("**bold text"));
        assert!(is_inline_balanced("**bold text**"));
    }
}
