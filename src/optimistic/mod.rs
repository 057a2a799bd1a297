//! Apply-now, confirm-later edits on a rendered collection.
//!
//! Edits to the same item are independent: a failing earlier edit restores
//! its own previous value even if a later edit has been applied since.

use crate::api::{ApiError, ApiResult};
use crate::runtime::{spawn_cancellable, SharedScheduler, TaskHandle};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::rc::Rc;

pub(crate) trait Keyed {
    type Key: Clone + PartialEq + fmt::Debug + 'static;

    fn key(&self) -> Self::Key;
}

impl Keyed for crate::models::Notification {
    type Key = i64;

    fn key(&self) -> i64 {
        self.id
    }
}

/// The one field an edit touches.
pub(crate) struct FieldLens<T, V> {
    pub get: fn(&T) -> V,
    pub set: fn(&mut T, V),
}

impl<T, V> Clone for FieldLens<T, V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T, V> Copy for FieldLens<T, V> {}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct OptimisticEdit<K, V> {
    pub id: u64,
    pub target_id: K,
    pub previous_value: V,
    pub applied_value: V,
    /// Set once the server accepts the edit, just before the record is dropped.
    pub confirmed: bool,
}

type ChangeListener<T, K, V> = Rc<dyn Fn(&[T], &[OptimisticEdit<K, V>])>;
type FailureListener = Rc<dyn Fn(&ApiError)>;

struct Inner<T: Keyed, V> {
    items: RefCell<Vec<T>>,
    lens: FieldLens<T, V>,
    edits: RefCell<Vec<OptimisticEdit<T::Key, V>>>,
    tasks: RefCell<Vec<(u64, TaskHandle)>>,
    next_id: Cell<u64>,
    scheduler: SharedScheduler,
    on_change: RefCell<Option<ChangeListener<T, T::Key, V>>>,
    on_failure: RefCell<Option<FailureListener>>,
}

pub(crate) struct OptimisticCoordinator<T: Keyed, V> {
    inner: Rc<Inner<T, V>>,
}

impl<T: Keyed, V> Clone for OptimisticCoordinator<T, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T, V> OptimisticCoordinator<T, V>
where
    T: Keyed + Clone + 'static,
    V: Clone + PartialEq + fmt::Debug + 'static,
{
    pub fn new(items: Vec<T>, lens: FieldLens<T, V>, scheduler: SharedScheduler) -> Self {
        Self {
            inner: Rc::new(Inner {
                items: RefCell::new(items),
                lens,
                edits: RefCell::new(Vec::new()),
                tasks: RefCell::new(Vec::new()),
                next_id: Cell::new(0),
                scheduler,
                on_change: RefCell::new(None),
                on_failure: RefCell::new(None),
            }),
        }
    }

    /// Called with the items and the edits still awaiting confirmation.
    pub fn on_change(&self, f: impl Fn(&[T], &[OptimisticEdit<T::Key, V>]) + 'static) {
        *self.inner.on_change.borrow_mut() = Some(Rc::new(f));
    }

    /// Non-blocking notification for a rolled back edit.
    pub fn on_failure(&self, f: impl Fn(&ApiError) + 'static) {
        *self.inner.on_failure.borrow_mut() = Some(Rc::new(f));
    }

    #[cfg(test)]
    pub fn items(&self) -> Vec<T> {
        self.inner.items.borrow().clone()
    }

    #[cfg(test)]
    pub fn pending_edits(&self) -> Vec<OptimisticEdit<T::Key, V>> {
        self.inner.edits.borrow().clone()
    }

    /// Swaps in a freshly fetched collection. Edits still awaiting
    /// confirmation are re-applied so a refetch does not undo them.
    pub fn replace_items(&self, mut items: Vec<T>) {
        for edit in self.inner.edits.borrow().iter() {
            if let Some(item) = items.iter_mut().find(|i| i.key() == edit.target_id) {
                (self.inner.lens.set)(item, edit.applied_value.clone());
            }
        }
        *self.inner.items.borrow_mut() = items;
        self.inner.notify();
    }

    /// Applies `value` to the item now and runs `confirm`. On failure the
    /// item gets its previous value back. `None` when no item has `target_id`.
    pub fn apply<F>(&self, target_id: T::Key, value: V, confirm: F) -> Option<u64>
    where
        F: Future<Output = ApiResult<()>> + 'static,
    {
        let inner = &self.inner;
        let previous_value = {
            let mut items = inner.items.borrow_mut();
            let item = items.iter_mut().find(|i| i.key() == target_id)?;
            let previous = (inner.lens.get)(item);
            (inner.lens.set)(item, value.clone());
            previous
        };

        let id = inner.next_id.get() + 1;
        inner.next_id.set(id);
        inner.edits.borrow_mut().push(OptimisticEdit {
            id,
            target_id,
            previous_value,
            applied_value: value,
            confirmed: false,
        });
        inner.notify();

        let weak = Rc::downgrade(inner);
        let task = spawn_cancellable(&*inner.scheduler, async move {
            let result = confirm.await;
            if let Some(inner) = weak.upgrade() {
                inner.settle(id, result);
            }
        });
        inner.tasks.borrow_mut().push((id, task));
        Some(id)
    }

    /// Stops waiting for confirmations; applied values stay as they are.
    pub fn teardown(&self) {
        for (_, task) in self.inner.tasks.borrow_mut().drain(..) {
            task.cancel();
        }
        self.inner.edits.borrow_mut().clear();
        self.inner.on_change.borrow_mut().take();
        self.inner.on_failure.borrow_mut().take();
    }
}

impl<T, V> Inner<T, V>
where
    T: Keyed + Clone + 'static,
    V: Clone + PartialEq + fmt::Debug + 'static,
{
    fn settle(&self, id: u64, result: ApiResult<()>) {
        self.tasks.borrow_mut().retain(|(i, _)| *i != id);
        let Some(mut edit) = self.take_edit(id) else {
            return;
        };

        match result {
            Ok(()) => {
                edit.confirmed = true;
                tracing::debug!(
                    event = "optimistic.confirmed",
                    edit = ?edit
                );
                self.notify();
            }
            Err(err) => {
                {
                    let mut items = self.items.borrow_mut();
                    if let Some(item) = items.iter_mut().find(|i| i.key() == edit.target_id) {
                        (self.lens.set)(item, edit.previous_value.clone());
                    }
                }
                tracing::warn!(
                    event = "optimistic.rolled_back",
                    edit_id = edit.id,
                    target = ?edit.target_id,
                    restored = ?edit.previous_value,
                    error = %err
                );
                self.notify();
                let on_failure = self.on_failure.borrow().clone();
                if let Some(f) = on_failure {
                    f(&err);
                }
            }
        }
    }

    fn take_edit(&self, id: u64) -> Option<OptimisticEdit<T::Key, V>> {
        let mut edits = self.edits.borrow_mut();
        let pos = edits.iter().position(|e| e.id == id)?;
        Some(edits.remove(pos))
    }

    fn notify(&self) {
        let listener = self.on_change.borrow().clone();
        if let Some(f) = listener {
            let items = self.items.borrow().clone();
            let edits = self.edits.borrow().clone();
            f(&items, &edits);
        }
    }
}

/// Lens over [`crate::models::Notification::read`].
pub(crate) fn notification_read_lens() -> FieldLens<crate::models::Notification, bool> {
    FieldLens {
        get: |n| n.read,
        set: |n, v| n.read = v,
    }
}
