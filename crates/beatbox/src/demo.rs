//! Demonstration endpoint handlers.

use beatbox_core::{
    FrameKind, HandlerError, HandlerRegistry, Invocation, RegistrationError, Signature, Typed,
    reflect_struct,
};
use serde::Deserialize;
use tracing::info;

reflect_struct! {
    /// Nested part of the `test` payload.
    #[derive(Debug, Deserialize)]
    pub struct Nested {
        pub d: i64,
    }
}

reflect_struct! {
    /// Payload of the `test` action.
    #[derive(Debug, Deserialize)]
    pub struct TestType {
        pub a: i64,
        pub b: String,
        pub c: Nested,
    }
}

/// Build the demonstration handler table.
pub fn handlers() -> Result<HandlerRegistry, RegistrationError> {
    let mut handlers = HandlerRegistry::new();

    let _ = handlers.register_action(
        "test",
        "This is the doc for the `test` action",
        &Signature::of::<TestType>("obj"),
        Typed::new(|inv: Invocation<TestType>| async move {
            let TestType { a, b, c } = inv.data;
            info!(conn_id = %inv.socket.id(), a, b = %b, d = c.d, "test action");
            Ok::<(), HandlerError>(())
        }),
    )?;

    let _ = handlers.register_event(
        "ping",
        "Log a ping from the client",
        &Signature::new().untyped_arg("data"),
        |inv: Invocation| async move {
            info!(conn_id = %inv.socket.id(), data = %inv.data, "ping event");
            Ok::<(), HandlerError>(())
        },
    )?;

    for n in 1..=4 {
        let _ = handlers.on_open(move |socket| {
            info!(conn_id = %socket.id(), observer = n, "open");
        });
    }
    let _ = handlers.on_message(|socket, payload, kind: FrameKind| {
        info!(conn_id = %socket.id(), bytes = payload.len(), kind = kind.as_str(), "message");
    });
    let _ = handlers.on_close(|socket, code, reason| {
        info!(conn_id = %socket.id(), code, reason, "close");
    });

    Ok(handlers)
}
