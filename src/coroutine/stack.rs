//! The per-coroutine stack: a growable buffer of frames and value slots
//! (§3.4, §4.H, §9).
//!
//! Both `frames` and `slots` are plain `Vec`s, so a push that needs to grow
//! the backing allocation may relocate it; nothing in this module (or its
//! callers) keeps a `&Frame`/`&Value` borrow alive across a call that could
//! push. Everything is addressed by index (`frame_offset`, `sp`, frame
//! index) and re-derefed fresh each time, per §9's "interior pointers into
//! a growable stack" note.

use crate::objects::FunctionRef;
use crate::value::Value;

use super::frame::{CatchFrame, Frame, SyncFrame, UserFrame};
use super::CoroutineToken;

#[derive(Debug, Default)]
pub struct CoroutineStack {
    frames: Vec<Frame>,
    slots: Vec<Value>,
}

impl CoroutineStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frame_count(&self) -> u32 {
        self.frames.len() as u32
    }

    pub fn top_frame_index(&self) -> Option<u32> {
        if self.frames.is_empty() {
            None
        } else {
            Some(self.frames.len() as u32 - 1)
        }
    }

    pub fn frame(&self, index: u32) -> &Frame {
        &self.frames[index as usize]
    }

    pub fn frame_mut(&mut self, index: u32) -> &mut Frame {
        &mut self.frames[index as usize]
    }

    /// Pushes a bytecode call frame with `args` copied into its first
    /// locals, returning its index.
    pub fn push_user_frame(&mut self, function: FunctionRef, env: Value, locals_count: u32, args: &[Value]) -> u32 {
        let frame_offset = self.slots.len() as u32;
        self.slots.resize(self.slots.len() + locals_count as usize, Value::null());
        for (slot, &arg) in self.slots[frame_offset as usize..].iter_mut().zip(args) {
            *slot = arg;
        }
        let sp = frame_offset + locals_count;
        self.frames.push(Frame::User(UserFrame {
            function,
            env,
            pc: 0,
            frame_offset,
            locals_count,
            sp,
            unwinding: false,
        }));
        self.frames.len() as u32 - 1
    }

    pub fn push_sync_frame(&mut self, caller: u32) -> u32 {
        self.frames.push(Frame::Sync(SyncFrame { caller }));
        self.frames.len() as u32 - 1
    }

    pub fn push_async_frame(&mut self, caller: u32, token: CoroutineToken) -> u32 {
        self.frames.push(Frame::Async(super::frame::AsyncFrame { caller, token, completion: None }));
        self.frames.len() as u32 - 1
    }

    pub fn push_catch_frame(&mut self, caller: u32) -> u32 {
        self.frames.push(Frame::Catch(CatchFrame { caller }));
        self.frames.len() as u32 - 1
    }

    /// Pops the top frame, releasing its local-slot region if it owned one.
    pub fn pop_frame(&mut self) -> Option<Frame> {
        let frame = self.frames.pop()?;
        if let Frame::User(user) = &frame {
            self.slots.truncate(user.frame_offset as usize);
        }
        Some(frame)
    }

    pub fn local(&self, frame: &UserFrame, slot: u32) -> Value {
        self.slots[(frame.frame_offset + slot) as usize]
    }

    pub fn set_local(&mut self, frame: &UserFrame, slot: u32, value: Value) {
        self.slots[(frame.frame_offset + slot) as usize] = value;
    }

    pub fn push_operand(&mut self, frame: &mut UserFrame, value: Value) {
        if frame.sp as usize == self.slots.len() {
            self.slots.push(value);
        } else {
            self.slots[frame.sp as usize] = value;
        }
        frame.sp += 1;
    }

    pub fn pop_operand(&mut self, frame: &mut UserFrame) -> Value {
        debug_assert!(frame.sp > frame.frame_offset + frame.locals_count, "operand stack underflow");
        frame.sp -= 1;
        self.slots[frame.sp as usize]
    }

    /// Pops `count` operands in push order (first pushed, first in the
    /// returned `Vec`) — the order call argument lists need.
    pub fn pop_operands(&mut self, frame: &mut UserFrame, count: u32) -> Vec<Value> {
        let mut values: Vec<Value> = (0..count).map(|_| self.pop_operand(frame)).collect();
        values.reverse();
        values
    }

    pub fn trace_live_slots(&self, tracer: &mut crate::heap::Tracer<'_>) {
        tracer.visit_all(self.slots.iter().copied());
        for frame in &self.frames {
            match frame {
                Frame::User(user) => tracer.visit(user.env),
                Frame::Async(async_frame) => {
                    if let Some(value) = async_frame.completion {
                        tracer.visit(value);
                    }
                }
                Frame::Sync(_) | Frame::Catch(_) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern::StringTable;

    fn function_ref(strings: &mut StringTable) -> FunctionRef {
        FunctionRef {
            module: strings.insert("m").unwrap(),
            index: 0,
        }
    }

    #[test]
    fn locals_and_operands_share_the_slot_region() {
        let mut strings = StringTable::new();
        let f = function_ref(&mut strings);
        let mut stack = CoroutineStack::new();
        let index = stack.push_user_frame(f, Value::null(), 2, &[Value::from_embedded_int(1).unwrap()]);

        let frame = *stack.frame(index).as_user().unwrap();
        assert_eq!(stack.local(&frame, 0).as_embedded_int(), Some(1));
        assert_eq!(stack.local(&frame, 1), Value::null());

        let mut frame = frame;
        stack.push_operand(&mut frame, Value::from_embedded_int(42).unwrap());
        assert_eq!(stack.pop_operand(&mut frame).as_embedded_int(), Some(42));
    }

    #[test]
    fn popping_a_user_frame_releases_its_locals() {
        let mut strings = StringTable::new();
        let f = function_ref(&mut strings);
        let mut stack = CoroutineStack::new();
        stack.push_user_frame(f, Value::null(), 4, &[]);
        stack.pop_frame();
        assert!(stack.is_empty());

        stack.push_user_frame(f, Value::null(), 1, &[]);
        let reused = stack.frame(0).as_user().unwrap();
        assert_eq!(reused.frame_offset, 0);
    }
}
