//! A query paired with its completion handler

use std::fmt;

use crate::error::Result;

/// Completion handler. Invoked exactly once, on the worker thread, with the
/// query's output or the failure that prevented it.
pub type Callback<O> = Box<dyn FnOnce(Result<O>) + Send + 'static>;

/// Unit of work for a [`Dispatcher`](crate::Dispatcher).
///
/// Everything the callback needs is moved into it; the submitting caller's
/// stack frame may be long gone by the time it runs.
pub struct Task<Q, O> {
    query: Q,
    callback: Callback<O>,
}

impl<Q, O> Task<Q, O> {
    /// Pair `query` with `callback`.
    pub fn new<F>(query: Q, callback: F) -> Self
    where
        F: FnOnce(Result<O>) + Send + 'static,
    {
        Self {
            query,
            callback: Box::new(callback),
        }
    }

    /// The query payload
    pub fn query(&self) -> &Q {
        &self.query
    }

    /// Split into payload and handler
    pub fn into_parts(self) -> (Q, Callback<O>) {
        (self.query, self.callback)
    }

    /// Run the handler with `outcome`, consuming the task
    pub fn complete(self, outcome: Result<O>) {
        (self.callback)(outcome);
    }
}

impl<Q: fmt::Debug, O> fmt::Debug for Task<Q, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("query", &self.query)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::mpsc;

    #[test]
    fn complete_hands_outcome_to_callback() {
        let (tx, rx) = mpsc::channel();
        let task: Task<&str, usize> = Task::new("SELECT 1", move |r| {
            tx.send(r.map_err(|e| e.to_string())).unwrap();
        });
        assert_eq!(*task.query(), "SELECT 1");
        task.complete(Ok(1));
        assert_eq!(rx.recv().unwrap(), Ok(1));
    }

    #[test]
    fn failure_reaches_callback() {
        let (tx, rx) = mpsc::channel();
        let task: Task<(), ()> = Task::new((), move |r| tx.send(r.is_err()).unwrap());
        let (_, callback) = task.into_parts();
        callback(Err(Error::ShutDown));
        assert!(rx.recv().unwrap());
    }
}
