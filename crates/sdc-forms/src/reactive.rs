//! Pull-based dependency tracking shared by every node of one form.
//!
//! A [`Signal`] is a versioned cell. A [`Memo`] caches a derived value together
//! with the `(signal, version)` pairs it read; it is fresh while all of those
//! versions are unchanged. Memos read from inside another memo forward their
//! dependencies, so every cache ends up keyed by plain signals only.
//! [`Reaction`]s are the write side: they re-run during [`Runtime::flush`] when
//! something they read has moved.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::{trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct CellId(usize);

type Dependencies = Vec<(CellId, u64)>;

#[derive(Default)]
pub(crate) struct Runtime {
    versions: RefCell<Vec<u64>>,
    frames: RefCell<Vec<Dependencies>>,
    reactions: RefCell<Vec<Weak<Reaction>>>,
    flushing: Cell<bool>,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("cells", &self.versions.borrow().len())
            .field("reactions", &self.reactions.borrow().len())
            .finish()
    }
}

impl Runtime {
    pub(crate) fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub(crate) fn allocate(&self) -> CellId {
        let mut versions = self.versions.borrow_mut();
        versions.push(0);
        CellId(versions.len() - 1)
    }

    fn version(&self, id: CellId) -> u64 {
        self.versions.borrow()[id.0]
    }

    fn track(&self, id: CellId) {
        let version = self.version(id);
        if let Some(frame) = self.frames.borrow_mut().last_mut() {
            frame.push((id, version));
        }
    }

    fn track_all(&self, dependencies: &[(CellId, u64)]) {
        if dependencies.is_empty() {
            return;
        }
        if let Some(frame) = self.frames.borrow_mut().last_mut() {
            frame.extend_from_slice(dependencies);
        }
    }

    fn bump(&self, id: CellId) {
        self.versions.borrow_mut()[id.0] += 1;
    }

    fn is_current(&self, dependencies: &[(CellId, u64)]) -> bool {
        let versions = self.versions.borrow();
        dependencies
            .iter()
            .all(|(id, version)| versions[id.0] == *version)
    }

    /// Runs `f` in a fresh tracking frame and returns what it read.
    fn collect<R>(&self, f: impl FnOnce() -> R) -> (R, Dependencies) {
        self.frames.borrow_mut().push(Vec::new());
        let result = f();
        let mut dependencies = self.frames.borrow_mut().pop().unwrap_or_default();
        // Stable sort keeps the earliest (oldest) version of a cell read twice.
        dependencies.sort_by_key(|(id, _)| *id);
        dependencies.dedup_by_key(|(id, _)| *id);
        (result, dependencies)
    }

    /// Runs `f` without recording any of its reads in the caller's frame.
    pub(crate) fn untracked<R>(&self, f: impl FnOnce() -> R) -> R {
        self.collect(f).0
    }

    pub(crate) fn register(&self, reaction: &Rc<Reaction>) {
        self.reactions.borrow_mut().push(Rc::downgrade(reaction));
    }

    /// Re-runs stale reactions until a full pass runs none of them.
    ///
    /// Returns `false` when `max_passes` was exhausted first. Nested calls
    /// (a reaction triggering a flush) return immediately.
    pub(crate) fn flush(&self, max_passes: usize) -> bool {
        if self.flushing.replace(true) {
            return true;
        }
        let mut settled = false;
        for pass in 0..max_passes {
            let reactions: Vec<Rc<Reaction>> = {
                let mut registered = self.reactions.borrow_mut();
                registered.retain(|reaction| {
                    reaction
                        .upgrade()
                        .is_some_and(|reaction| !reaction.disposed.get())
                });
                registered.iter().filter_map(Weak::upgrade).collect()
            };
            let mut ran = 0usize;
            for reaction in reactions {
                if reaction.is_stale(self) {
                    reaction.run(self);
                    ran += 1;
                }
            }
            trace!(pass, ran, "reaction pass finished");
            if ran == 0 {
                settled = true;
                break;
            }
        }
        self.flushing.set(false);
        if !settled {
            warn!(max_passes, "reactions did not settle within the pass limit");
        }
        settled
    }
}

/// Versioned value cell.
pub(crate) struct Signal<T> {
    runtime: Rc<Runtime>,
    id: CellId,
    value: RefCell<T>,
}

impl<T: fmt::Debug> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Signal").field(&self.value.borrow()).finish()
    }
}

impl<T> Signal<T> {
    pub(crate) fn new(runtime: &Rc<Runtime>, value: T) -> Self {
        Self {
            runtime: runtime.clone(),
            id: runtime.allocate(),
            value: RefCell::new(value),
        }
    }

    pub(crate) fn get(&self) -> T
    where
        T: Clone,
    {
        self.runtime.track(self.id);
        self.value.borrow().clone()
    }

    pub(crate) fn get_untracked(&self) -> T
    where
        T: Clone,
    {
        self.value.borrow().clone()
    }

    /// Reads through a borrow. `f` must not write this signal.
    pub(crate) fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.runtime.track(self.id);
        f(&self.value.borrow())
    }

    /// Stores `value` and returns whether it differed from the previous one.
    pub(crate) fn set(&self, value: T) -> bool
    where
        T: PartialEq,
    {
        let changed = {
            let mut current = self.value.borrow_mut();
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        };
        if changed {
            self.runtime.bump(self.id);
        }
        changed
    }

    /// Mutates in place; always counts as a change.
    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let result = f(&mut self.value.borrow_mut());
        self.runtime.bump(self.id);
        result
    }
}

struct MemoState<T> {
    value: Option<T>,
    dependencies: Dependencies,
    computing: bool,
}

/// Cached derived value, recomputed lazily when a dependency moved.
pub(crate) struct Memo<T> {
    runtime: Rc<Runtime>,
    state: RefCell<MemoState<T>>,
}

impl<T> fmt::Debug for Memo<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("Memo")
            .field("cached", &state.value.is_some())
            .field("dependencies", &state.dependencies.len())
            .finish()
    }
}

impl<T: Clone + Default> Memo<T> {
    pub(crate) fn new(runtime: &Rc<Runtime>) -> Self {
        Self {
            runtime: runtime.clone(),
            state: RefCell::new(MemoState {
                value: None,
                dependencies: Vec::new(),
                computing: false,
            }),
        }
    }

    /// Returns the cached value or recomputes it with `compute`, which
    /// receives the previous value (if any).
    pub(crate) fn get(&self, compute: impl FnOnce(Option<&T>) -> T) -> T {
        let previous = {
            let state = self.state.borrow();
            if state.computing {
                trace!("memo re-entered while computing, returning last value");
                self.runtime.track_all(&state.dependencies);
                return state.value.clone().unwrap_or_default();
            }
            if let Some(value) = &state.value
                && self.runtime.is_current(&state.dependencies)
            {
                self.runtime.track_all(&state.dependencies);
                return value.clone();
            }
            state.value.clone()
        };

        self.state.borrow_mut().computing = true;
        let (value, dependencies) = self.runtime.collect(|| compute(previous.as_ref()));
        self.runtime.track_all(&dependencies);

        let mut state = self.state.borrow_mut();
        state.value = Some(value.clone());
        state.dependencies = dependencies;
        state.computing = false;
        value
    }
}

/// Side-effecting computation re-run whenever something it read changed.
pub(crate) struct Reaction {
    label: &'static str,
    dependencies: RefCell<Option<Dependencies>>,
    action: Box<dyn Fn()>,
    disposed: Cell<bool>,
}

impl fmt::Debug for Reaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reaction")
            .field("label", &self.label)
            .field("disposed", &self.disposed.get())
            .finish()
    }
}

impl Reaction {
    pub(crate) fn new(runtime: &Rc<Runtime>, label: &'static str, action: impl Fn() + 'static) -> Rc<Self> {
        let reaction = Rc::new(Self {
            label,
            dependencies: RefCell::new(None),
            action: Box::new(action),
            disposed: Cell::new(false),
        });
        runtime.register(&reaction);
        reaction
    }

    fn is_stale(&self, runtime: &Runtime) -> bool {
        if self.disposed.get() {
            return false;
        }
        match &*self.dependencies.borrow() {
            None => true,
            Some(dependencies) => !runtime.is_current(dependencies),
        }
    }

    fn run(&self, runtime: &Runtime) {
        trace!(label = self.label, "running reaction");
        let ((), dependencies) = runtime.collect(|| (self.action)());
        *self.dependencies.borrow_mut() = Some(dependencies);
    }

    pub(crate) fn dispose(&self) {
        self.disposed.set(true);
        self.dependencies.borrow_mut().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memo_recomputes_only_after_a_dependency_changes() {
        let runtime = Runtime::new();
        let source = Signal::new(&runtime, 2);
        let memo: Memo<i32> = Memo::new(&runtime);
        let calls = Cell::new(0);

        let read = || {
            memo.get(|_| {
                calls.set(calls.get() + 1);
                source.get() * 10
            })
        };

        assert_eq!(read(), 20);
        assert_eq!(read(), 20);
        assert_eq!(calls.get(), 1);

        source.set(3);
        assert_eq!(read(), 30);
        assert_eq!(calls.get(), 2);

        assert!(!source.set(3));
        assert_eq!(read(), 30);
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn nested_memos_forward_their_dependencies() {
        let runtime = Runtime::new();
        let source = Signal::new(&runtime, 1);
        let inner: Memo<i32> = Memo::new(&runtime);
        let outer: Memo<i32> = Memo::new(&runtime);

        let read = || outer.get(|_| inner.get(|_| source.get() + 1) * 2);
        assert_eq!(read(), 4);
        source.set(5);
        assert_eq!(read(), 12);
    }

    #[test]
    fn reentrant_memo_returns_last_value_instead_of_recursing() {
        let runtime = Runtime::new();
        let memo: Rc<Memo<i32>> = Rc::new(Memo::new(&runtime));
        let inner = memo.clone();
        let value = memo.get(move |_| inner.get(|_| 99) + 1);
        assert_eq!(value, 1);
    }

    #[test]
    fn reactions_rerun_until_quiescent() {
        let runtime = Runtime::new();
        let target = Rc::new(Signal::new(&runtime, 0));
        let floor = Rc::new(Signal::new(&runtime, 3));
        let (t, f) = (target.clone(), floor.clone());
        let _reaction = Reaction::new(&runtime, "floor", move || {
            if t.get() < f.get() {
                t.update(|value| *value += 1);
            }
        });

        assert!(runtime.flush(16));
        assert_eq!(target.get_untracked(), 3);

        floor.set(5);
        assert!(runtime.flush(16));
        assert_eq!(target.get_untracked(), 5);
    }

    #[test]
    fn flush_reports_unsettled_feedback_loops() {
        let runtime = Runtime::new();
        let counter = Rc::new(Signal::new(&runtime, 0u32));
        let c = counter.clone();
        let _reaction = Reaction::new(&runtime, "runaway", move || {
            let next = c.get() + 1;
            c.set(next);
        });
        assert!(!runtime.flush(4));
        assert_eq!(counter.get_untracked(), 4);
    }

    #[test]
    fn disposed_reactions_stop_running() {
        let runtime = Runtime::new();
        let source = Rc::new(Signal::new(&runtime, 0));
        let runs = Rc::new(Cell::new(0));
        let (s, r) = (source.clone(), runs.clone());
        let reaction = Reaction::new(&runtime, "count", move || {
            s.get();
            r.set(r.get() + 1);
        });
        runtime.flush(4);
        reaction.dispose();
        source.set(1);
        runtime.flush(4);
        assert_eq!(runs.get(), 1);
    }
}
