//! Action runner: marshal work onto a thread-affine execution context.

pub mod looper;
