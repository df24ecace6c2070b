//! Job dispatch surface: payload wire format, handler/hook traits, and the
//! handler registry.

mod handler;
mod payload;
mod registry;

pub use handler::{
    ErrorHook, ErrorHookFn, ErrorHookRef, Handler, HandlerFn, HandlerRef, Hook, HookFn, HookRef,
    JobContext,
};
pub use payload::{enqueue, Payload};
pub use registry::HandlerRegistry;
