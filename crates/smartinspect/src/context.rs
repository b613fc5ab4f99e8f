// Copyright 2025-Present the smartinspect-rs authors
// SPDX-License-Identifier: Apache-2.0

//! Tag scopes and correlation identifiers.
//!
//! Two independent stacks: one of key/value tag frames, one of
//! correlation/operation frames. Entering a scope pushes a frame and returns a
//! guard; dropping the guard removes exactly that frame, wherever it sits in
//! the stack, so early returns, `?`, and panics all restore the prior state.
//! The effective context of a packet is computed (and frozen) at packet
//! creation; scope changes never touch packets that already exist.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

fn next_token(counter: &AtomicU64) -> u64 {
    counter.fetch_add(1, Ordering::Relaxed)
}

struct TagFrame {
    token: u64,
    tags: Vec<(String, String)>,
}

struct TagStackInner {
    frames: Mutex<Vec<TagFrame>>,
    tokens: AtomicU64,
}

/// Nestable key/value tag scopes shared by all sessions of a client.
#[derive(Clone)]
pub struct ContextStack {
    inner: Arc<TagStackInner>,
}

impl Default for ContextStack {
    fn default() -> Self {
        ContextStack {
            inner: Arc::new(TagStackInner {
                frames: Mutex::new(Vec::new()),
                tokens: AtomicU64::new(1),
            }),
        }
    }
}

impl ContextStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enters a scope carrying the given tags. The scope lasts until the
    /// returned guard is dropped.
    #[must_use = "the scope ends when the guard is dropped"]
    pub fn push<K, V>(&self, tags: impl IntoIterator<Item = (K, V)>) -> ScopeGuard
    where
        K: Into<String>,
        V: Into<String>,
    {
        let token = next_token(&self.inner.tokens);
        let frame = TagFrame {
            token,
            tags: tags
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        };
        if let Ok(mut frames) = self.inner.frames.lock() {
            frames.push(frame);
        }
        ScopeGuard {
            stack: Arc::clone(&self.inner),
            token,
        }
    }

    /// Folds all active frames outer to inner; inner frames override outer
    /// ones on key collision. Insertion order of first appearance is kept.
    pub fn merged(&self) -> Vec<(String, String)> {
        self.merged_with(&[])
    }

    /// Like [`merged`](Self::merged), with packet-local inline tags applied
    /// last at highest priority.
    pub fn merged_with(&self, inline: &[(&str, &str)]) -> Vec<(String, String)> {
        let mut out: Vec<(String, String)> = Vec::new();
        let mut apply = |key: &str, value: &str| {
            match out.iter_mut().find(|(k, _)| k == key) {
                Some((_, v)) => *v = value.to_string(),
                None => out.push((key.to_string(), value.to_string())),
            }
        };
        if let Ok(frames) = self.inner.frames.lock() {
            for frame in frames.iter() {
                for (key, value) in &frame.tags {
                    apply(key, value);
                }
            }
        }
        for (key, value) in inline {
            apply(key, value);
        }
        out
    }
}

/// Removes its tag frame on drop.
pub struct ScopeGuard {
    stack: Arc<TagStackInner>,
    token: u64,
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        if let Ok(mut frames) = self.stack.frames.lock() {
            frames.retain(|frame| frame.token != self.token);
        }
    }
}

struct CorrelationFrame {
    token: u64,
    correlation_id: Option<String>,
    operation: Option<String>,
}

struct CorrelationStackInner {
    frames: Mutex<Vec<CorrelationFrame>>,
    tokens: AtomicU64,
}

/// Nestable correlation/operation identifier scopes, parallel to
/// [`ContextStack`] but independent of it.
#[derive(Clone)]
pub struct CorrelationStack {
    inner: Arc<CorrelationStackInner>,
}

impl Default for CorrelationStack {
    fn default() -> Self {
        CorrelationStack {
            inner: Arc::new(CorrelationStackInner {
                frames: Mutex::new(Vec::new()),
                tokens: AtomicU64::new(1),
            }),
        }
    }
}

impl CorrelationStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enters a correlation scope with explicit identifiers. `None` fields
    /// fall through to the enclosing scope.
    #[must_use = "the scope ends when the guard is dropped"]
    pub fn push(
        &self,
        correlation_id: Option<String>,
        operation: Option<String>,
    ) -> CorrelationGuard {
        let token = next_token(&self.inner.tokens);
        if let Ok(mut frames) = self.inner.frames.lock() {
            frames.push(CorrelationFrame {
                token,
                correlation_id,
                operation,
            });
        }
        CorrelationGuard {
            stack: Arc::clone(&self.inner),
            token,
        }
    }

    /// Starts a fresh correlation with a generated identifier.
    #[must_use = "the scope ends when the guard is dropped"]
    pub fn begin(&self, operation: &str) -> CorrelationGuard {
        self.push(Some(generate_id()), Some(operation.to_string()))
    }

    /// The innermost identifiers, each field resolved independently.
    pub fn current(&self) -> (Option<String>, Option<String>) {
        let mut correlation_id = None;
        let mut operation = None;
        if let Ok(frames) = self.inner.frames.lock() {
            for frame in frames.iter().rev() {
                if correlation_id.is_none() {
                    correlation_id = frame.correlation_id.clone();
                }
                if operation.is_none() {
                    operation = frame.operation.clone();
                }
                if correlation_id.is_some() && operation.is_some() {
                    break;
                }
            }
        }
        (correlation_id, operation)
    }
}

/// Removes its correlation frame on drop.
pub struct CorrelationGuard {
    stack: Arc<CorrelationStackInner>,
    token: u64,
}

impl Drop for CorrelationGuard {
    fn drop(&mut self) {
        if let Ok(mut frames) = self.stack.frames.lock() {
            frames.retain(|frame| frame.token != self.token);
        }
    }
}

/// 16 hex chars from the clock and a process-wide counter. Unique enough to
/// stitch traces together in the console; not a UUID.
fn generate_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{:016x}", nanos.wrapping_mul(0x9e37_79b9_7f4a_7c15) ^ count)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_nested_scopes_merge_inner_over_outer() {
        let stack = ContextStack::new();
        let _a = stack.push([("a", "1"), ("b", "2")]);
        {
            let _b = stack.push([("b", "3"), ("c", "4")]);
            assert_eq!(stack.merged(), tags(&[("a", "1"), ("b", "3"), ("c", "4")]));
        }
        assert_eq!(stack.merged(), tags(&[("a", "1"), ("b", "2")]));
    }

    #[test]
    fn test_inline_tags_win() {
        let stack = ContextStack::new();
        let _a = stack.push([("a", "1"), ("b", "2")]);
        assert_eq!(
            stack.merged_with(&[("b", "9"), ("d", "7")]),
            tags(&[("a", "1"), ("b", "9"), ("d", "7")])
        );
        // inline tags never leak into the stack
        assert_eq!(stack.merged(), tags(&[("a", "1"), ("b", "2")]));
    }

    #[test]
    fn test_out_of_order_guard_drop() {
        let stack = ContextStack::new();
        let a = stack.push([("a", "1")]);
        let b = stack.push([("b", "2")]);
        drop(a);
        assert_eq!(stack.merged(), tags(&[("b", "2")]));
        drop(b);
        assert!(stack.merged().is_empty());
    }

    #[test]
    fn test_panic_still_pops_scope() {
        let stack = ContextStack::new();
        let stack_clone = stack.clone();
        let result = std::panic::catch_unwind(move || {
            let _guard = stack_clone.push([("a", "1")]);
            panic!("boom");
        });
        assert!(result.is_err());
        assert!(stack.merged().is_empty());
    }

    #[test]
    fn test_correlation_innermost_wins_per_field() {
        let stack = CorrelationStack::new();
        let _outer = stack.push(Some("trace-1".to_string()), Some("outer".to_string()));
        {
            let _inner = stack.push(None, Some("inner".to_string()));
            let (cid, op) = stack.current();
            assert_eq!(cid.as_deref(), Some("trace-1"));
            assert_eq!(op.as_deref(), Some("inner"));
        }
        let (cid, op) = stack.current();
        assert_eq!(cid.as_deref(), Some("trace-1"));
        assert_eq!(op.as_deref(), Some("outer"));
    }

    #[test]
    fn test_begin_generates_distinct_ids() {
        let stack = CorrelationStack::new();
        let g1 = stack.begin("op-a");
        let (first, _) = stack.current();
        drop(g1);
        let _g2 = stack.begin("op-b");
        let (second, _) = stack.current();
        assert_ne!(first, second);
        assert_eq!(first.unwrap().len(), 16);
    }
}
