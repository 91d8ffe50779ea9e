//! Shared helpers for engine integration tests

#![allow(dead_code)]

use revo::prelude::*;
use std::sync::Once;

static TRACING: Once = Once::new();

/// Route engine events to the test output
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();
    });
}

/// Fresh engine with tracing enabled
pub fn engine() -> Engine {
    init_tracing();
    Engine::new()
}

/// Create an object with integer members
pub fn object(engine: &Engine, hint: &str, members: &[(&str, i64)]) -> ObjectId {
    let members = members.to_vec();
    engine
        .transaction("create", |tx| tx.create(hint, members))
        .expect("create object")
}

/// Committed integer member
pub fn int(engine: &Engine, object: ObjectId, member: &str) -> i64 {
    engine
        .read(object, member)
        .expect("read member")
        .as_int()
        .expect("integer member")
}

/// Committed string member
pub fn text(engine: &Engine, object: ObjectId, member: &str) -> String {
    engine
        .read(object, member)
        .expect("read member")
        .as_str()
        .unwrap_or_default()
        .to_string()
}
