//! Call frame variants stored on a coroutine's stack (§3.4).
//!
//! `UserFrame` is the only variant with its own local-slot region; the
//! others are thin markers the scheduler and interpreter consult when
//! deciding what to do next. Grounded on `fuel-vm`'s `CallFrame`
//! (`call.rs`) for the "one struct per call, index-addressed" shape,
//! generalized to the four kinds §3.4 lists.

use crate::objects::FunctionRef;
use crate::value::Value;

use super::CoroutineToken;

/// A bytecode invocation. `frame_offset`/`sp` are indices into the owning
/// `CoroutineStack`'s slot buffer (§9: never raw pointers, since a push
/// that grows the buffer invalidates any reference into it).
#[derive(Debug, Clone, Copy)]
pub struct UserFrame {
    pub function: FunctionRef,
    pub env: Value,
    pub pc: u32,
    /// Index of this frame's first local slot.
    pub frame_offset: u32,
    pub locals_count: u32,
    /// Index one past this frame's current operand-stack top; always
    /// `>= frame_offset + locals_count`.
    pub sp: u32,
    /// Set while unwinding has already consumed this frame's own handler
    /// table without finding a match, so the caller knows to keep
    /// propagating rather than resume normal execution.
    pub unwinding: bool,
}

/// A synchronous native call in progress, executed to completion on the
/// caller's own turn through the scheduler (§4.H).
#[derive(Debug, Clone, Copy)]
pub struct SyncFrame {
    /// Frame index execution resumes at once the native call returns.
    pub caller: u32,
}

/// An asynchronous native call: installed, then control returns to the
/// scheduler loop until the issued token is resumed and a completion value
/// has been provided.
#[derive(Debug, Clone, Copy)]
pub struct AsyncFrame {
    pub caller: u32,
    pub token: CoroutineToken,
    pub completion: Option<Value>,
}

/// Marks an active `std.catch_panic` boundary: unwinding stops here and
/// the in-flight exception is captured as a failed `Result` instead of
/// propagating further (§4.I, §7).
#[derive(Debug, Clone, Copy)]
pub struct CatchFrame {
    /// Frame index execution resumes at, with the caught result pushed as
    /// that frame's call result.
    pub caller: u32,
}

#[derive(Debug, Clone, Copy)]
pub enum Frame {
    User(UserFrame),
    Sync(SyncFrame),
    Async(AsyncFrame),
    Catch(CatchFrame),
}

impl Frame {
    pub fn as_user(&self) -> Option<&UserFrame> {
        match self {
            Frame::User(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_user_mut(&mut self) -> Option<&mut UserFrame> {
        match self {
            Frame::User(f) => Some(f),
            _ => None,
        }
    }
}
