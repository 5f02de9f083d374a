//! Test helpers and fixtures for holdfast integration tests.
//!
//! Everything runs against [`MockEngine`], which recycles handle values the
//! way the native engine does and logs every call.

#![allow(dead_code)]

use holdfast::prelude::*;
use holdfast::RetainedResource;
use holdfast_core::mock::{EngineCall, MockEngine};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Install a test-writer subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Inline-dispatch facade over a fresh mock engine.
pub fn mock_holdfast() -> (Arc<MockEngine>, Holdfast) {
    mock_holdfast_with(DispatchMode::Inline, 1)
}

/// Facade whose engine hands out handle values starting at `first_handle`.
pub fn mock_holdfast_with(mode: DispatchMode, first_handle: u32) -> (Arc<MockEngine>, Holdfast) {
    init_tracing();
    let engine = Arc::new(MockEngine::starting_at(first_handle));
    let holdfast = Holdfast::builder()
        .dispatch(mode)
        .build(engine.clone() as Arc<dyn NativeEngine>)
        .expect("Failed to build holdfast");
    (engine, holdfast)
}

/// Resource counting its releases.
pub struct Counted {
    pub count: Arc<AtomicUsize>,
}

impl Counted {
    pub fn new() -> (Arc<AtomicUsize>, Arc<dyn RetainedResource>) {
        let count = Arc::new(AtomicUsize::new(0));
        let resource: Arc<dyn RetainedResource> = Arc::new(Counted {
            count: Arc::clone(&count),
        });
        (count, resource)
    }
}

impl RetainedResource for Counted {
    fn release(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn releases(count: &AtomicUsize) -> usize {
    count.load(Ordering::SeqCst)
}

pub fn attach_calls(engine: &MockEngine) -> usize {
    engine.count(|c| matches!(c, EngineCall::AttachEffect { .. }))
}

pub fn detach_calls(engine: &MockEngine) -> usize {
    engine.count(|c| matches!(c, EngineCall::DetachEffect { .. }))
}

pub fn push_calls(engine: &MockEngine) -> usize {
    engine.count(|c| matches!(c, EngineCall::SetEffectParameters { .. }))
}

/// Bytes of the last parameter push.
pub fn last_push(engine: &MockEngine) -> Option<Vec<u8>> {
    engine.calls().into_iter().rev().find_map(|c| match c {
        EngineCall::SetEffectParameters { bytes, .. } => Some(bytes),
        _ => None,
    })
}
