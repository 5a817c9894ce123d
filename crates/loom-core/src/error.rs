// Copyright (c) 2026 Loom Contributors
//
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

/// Errors produced by the streaming event pipeline.
///
/// Markdown conversion failure is intentionally *not* a variant here — per
/// the error-handling design, a conversion failure falls back to an escaped
/// `<pre>` block rather than propagating. These variants are for genuine
/// programmer-visible misuse (buffer used after close, bad seq provider).
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("buffer already closed")]
    AlreadyClosed,

    #[error("seq provider exhausted i64 range")]
    SeqOverflow,
}

pub type Result<T> = std::result::Result<T, CoreError>;
