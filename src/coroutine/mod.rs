//! Cooperative coroutine scheduling (§3.4, §4.H, §5).
//!
//! A `Scheduler` owns every coroutine a context has created, indexed by
//! `CoroutineId` the same way `Heap` indexes pages and large objects rather
//! than handing out raw pointers. Only one coroutine ever runs at a time;
//! `run_ready` drains the FIFO ready queue, handing each coroutine to the
//! interpreter until it yields or completes.

mod frame;
mod stack;

pub use frame::{AsyncFrame, CatchFrame, Frame, SyncFrame, UserFrame};
pub use stack::CoroutineStack;

use std::collections::VecDeque;

use crate::error::VmResult;
use crate::heap::{RootSet, Tracer};
use crate::value::Value;

/// Indexes `Scheduler`'s coroutine table; never reused once issued; fine
/// because a `Scheduler` lives exactly as long as its owning `Context`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CoroutineId(u32);

impl CoroutineId {
    pub fn index(self) -> u32 {
        self.0
    }
}

/// A single-use permission to move a `Waiting` coroutine back to `Ready`
/// (§4.H). Issued when an async native call suspends the coroutine;
/// resuming twice is a harmless no-op (the coroutine is no longer
/// `Waiting` the second time).
#[derive(Debug, Clone, Copy)]
pub struct CoroutineToken(CoroutineId);

/// `§3.4` lists `Started` as a distinct state from `Ready`; this
/// implementation folds it into a `started` flag on `Coroutine` instead,
/// since `§4.H`'s flow (`New → Ready → Running → (Waiting → Ready)* →
/// Done`) never treats it as a separate scheduling state — the flag is
/// only observable for diagnostics (a coroutine that's `Ready` but never
/// `started` has never executed an instruction yet).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoroutineState {
    New,
    Ready,
    Running,
    Waiting,
    Done,
}

type CompletionCallback = Box<dyn FnOnce(VmResult<Value>)>;

pub struct Coroutine {
    pub stack: CoroutineStack,
    pub state: CoroutineState,
    pub started: bool,
    /// The successful result, once `Done`. An error outcome is handed
    /// straight to the completion callback instead of being stored here —
    /// `VmError` carries an `Exception` that isn't `Clone`, and nothing
    /// else needs to inspect it after the callback has run.
    result: Option<Value>,
    on_done: Option<CompletionCallback>,
}

impl std::fmt::Debug for Coroutine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coroutine").field("state", &self.state).field("started", &self.started).finish()
    }
}

impl Coroutine {
    fn new() -> Self {
        Self {
            stack: CoroutineStack::new(),
            state: CoroutineState::New,
            started: false,
            result: None,
            on_done: None,
        }
    }

    pub fn result(&self) -> Option<Value> {
        self.result
    }
}

#[derive(Default)]
pub struct Scheduler {
    coroutines: Vec<Coroutine>,
    ready: VecDeque<CoroutineId>,
}

impl RootSet for Scheduler {
    /// Every coroutine the scheduler still owns is rooted directly,
    /// regardless of state: a `Waiting` coroutine's locals must survive
    /// until it resumes, and a just-`Done` coroutine's result slot must
    /// survive until its completion callback has consumed it.
    fn trace_roots(&self, tracer: &mut Tracer<'_>) {
        for coroutine in &self.coroutines {
            coroutine.stack.trace_live_slots(tracer);
            if let Some(value) = coroutine.result {
                tracer.visit(value);
            }
        }
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a coroutine in state `New` and immediately schedules it
    /// (§4.H's flow goes straight from `New` to `Ready`).
    pub fn spawn(&mut self) -> CoroutineId {
        let id = CoroutineId(self.coroutines.len() as u32);
        let mut coroutine = Coroutine::new();
        coroutine.state = CoroutineState::Ready;
        self.coroutines.push(coroutine);
        self.ready.push_back(id);
        id
    }

    /// Like [`spawn`](Self::spawn), registering a completion callback
    /// invoked exactly once when the coroutine reaches `Done`.
    pub fn spawn_with_completion(&mut self, on_done: impl FnOnce(VmResult<Value>) + 'static) -> CoroutineId {
        let id = self.spawn();
        self.coroutines[id.index() as usize].on_done = Some(Box::new(on_done));
        id
    }

    pub fn get(&self, id: CoroutineId) -> &Coroutine {
        &self.coroutines[id.index() as usize]
    }

    pub fn get_mut(&mut self, id: CoroutineId) -> &mut Coroutine {
        &mut self.coroutines[id.index() as usize]
    }

    pub fn state(&self, id: CoroutineId) -> CoroutineState {
        self.coroutines[id.index() as usize].state
    }

    /// Suspends `id` and hands its caller a single-use resume token
    /// (§4.H's yield side of an async native call).
    pub fn suspend(&mut self, id: CoroutineId) -> CoroutineToken {
        self.coroutines[id.index() as usize].state = CoroutineState::Waiting;
        CoroutineToken(id)
    }

    /// Moves a waiting coroutine back to `Ready`, to run on a later
    /// `run_ready` iteration. A token whose coroutine is no longer
    /// `Waiting` (already resumed) is a no-op, enforcing "single-use"
    /// without needing a separate consumed flag.
    pub fn resume(&mut self, token: CoroutineToken) {
        let slot = &mut self.coroutines[token.0.index() as usize];
        if slot.state == CoroutineState::Waiting {
            slot.state = CoroutineState::Ready;
            self.ready.push_back(token.0);
        }
    }

    fn mark_done(&mut self, id: CoroutineId, result: VmResult<Value>) {
        let coroutine = &mut self.coroutines[id.index() as usize];
        coroutine.state = CoroutineState::Done;
        coroutine.result = result.as_ref().ok().copied();
        let callback = coroutine.on_done.take();
        if let Some(callback) = callback {
            callback(result);
        }
    }

    /// Drains the FIFO ready queue, running each coroutine via `step`
    /// until it yields into `Waiting` or reaches `Done`. `step` runs one
    /// coroutine until it suspends, returning its outcome once `Done`.
    pub fn run_ready(&mut self, mut step: impl FnMut(&mut Scheduler, CoroutineId) -> VmResult<Option<Value>>) {
        while let Some(id) = self.ready.pop_front() {
            self.coroutines[id.index() as usize].state = CoroutineState::Running;
            self.coroutines[id.index() as usize].started = true;
            match step(self, id) {
                Ok(Some(value)) => self.mark_done(id, Ok(value)),
                Ok(None) => {} // suspended into Waiting; `step` already updated state via `suspend`
                Err(err) => self.mark_done(id, Err(err)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawned_coroutines_run_fifo() {
        let mut scheduler = Scheduler::new();
        let order = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let a = scheduler.spawn();
        let b = scheduler.spawn();

        let order_clone = order.clone();
        scheduler.run_ready(move |_scheduler, id| {
            order_clone.borrow_mut().push(id);
            Ok(Some(Value::null()))
        });

        assert_eq!(*order.borrow(), vec![a, b]);
    }

    #[test]
    fn a_coroutine_that_yields_reschedules_on_resume() {
        let mut scheduler = Scheduler::new();
        let id = scheduler.spawn();
        let mut token_slot = None;

        scheduler.run_ready(|scheduler, coroutine| {
            token_slot = Some(scheduler.suspend(coroutine));
            Ok(None)
        });
        assert_eq!(scheduler.state(id), CoroutineState::Waiting);

        scheduler.resume(token_slot.unwrap());
        assert_eq!(scheduler.state(id), CoroutineState::Ready);

        scheduler.run_ready(|_scheduler, _coroutine| Ok(Some(Value::null())));
        assert_eq!(scheduler.state(id), CoroutineState::Done);
    }

    #[test]
    fn completion_callback_runs_exactly_once() {
        let mut scheduler = Scheduler::new();
        let calls = std::rc::Rc::new(std::cell::RefCell::new(0));
        let calls_clone = calls.clone();
        scheduler.spawn_with_completion(move |_result| {
            *calls_clone.borrow_mut() += 1;
        });

        scheduler.run_ready(|_scheduler, _coroutine| Ok(Some(Value::null())));
        assert_eq!(*calls.borrow(), 1);
    }
}
