//! Mutations: one-shot writes with success/error/settled callbacks.

use std::fmt;
use std::future::Future;

use futures_util::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use tracing::debug;

use crate::error::QueryError;

type MutateFn<D, V> = Box<dyn Fn(V) -> BoxFuture<'static, Result<D, QueryError>> + Send + Sync>;
type SuccessCallback<D, V> = Box<dyn Fn(&D, &V) + Send + Sync>;
type ErrorCallback<V> = Box<dyn Fn(&QueryError, &V) + Send + Sync>;
type SettledCallback<D, V> = Box<dyn Fn(Option<&D>, Option<&QueryError>, &V) + Send + Sync>;

// == Mutation State ==
#[derive(Debug, Clone)]
pub struct MutationState<D> {
    pub data: Option<D>,
    pub error: Option<QueryError>,
    pub is_loading: bool,
    pub is_error: bool,
    pub is_success: bool,
}

impl<D> Default for MutationState<D> {
    fn default() -> Self {
        Self {
            data: None,
            error: None,
            is_loading: false,
            is_error: false,
            is_success: false,
        }
    }
}

// == Mutation ==
pub struct Mutation<D, V> {
    mutate_fn: MutateFn<D, V>,
    on_success: Option<SuccessCallback<D, V>>,
    on_error: Option<ErrorCallback<V>>,
    on_settled: Option<SettledCallback<D, V>>,
    state: Mutex<MutationState<D>>,
}

impl<D, V> Mutation<D, V>
where
    D: Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    pub fn new<F, Fut, E>(mutate_fn: F) -> Self
    where
        F: Fn(V) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<D, E>> + Send + 'static,
        E: fmt::Display,
    {
        Self {
            mutate_fn: Box::new(move |variables| {
                mutate_fn(variables)
                    .map(|result| result.map_err(|err| QueryError::Fetch(err.to_string())))
                    .boxed()
            }),
            on_success: None,
            on_error: None,
            on_settled: None,
            state: Mutex::new(MutationState::default()),
        }
    }

    pub fn on_success(mut self, callback: impl Fn(&D, &V) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Box::new(callback));
        self
    }

    pub fn on_error(mut self, callback: impl Fn(&QueryError, &V) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Box::new(callback));
        self
    }

    pub fn on_settled(
        mut self,
        callback: impl Fn(Option<&D>, Option<&QueryError>, &V) + Send + Sync + 'static,
    ) -> Self {
        self.on_settled = Some(Box::new(callback));
        self
    }

    // == Mutate ==
    /// Runs the mutation. The outcome is both returned and recorded in
    /// [`Mutation::state`]; `on_success`/`on_error` run before `on_settled`.
    pub async fn mutate(&self, variables: V) -> Result<D, QueryError> {
        *self.state.lock() = MutationState {
            is_loading: true,
            ..MutationState::default()
        };

        let outcome = (self.mutate_fn)(variables.clone()).await;

        match &outcome {
            Ok(data) => {
                *self.state.lock() = MutationState {
                    data: Some(data.clone()),
                    is_success: true,
                    ..MutationState::default()
                };
                if let Some(callback) = &self.on_success {
                    callback(data, &variables);
                }
                if let Some(callback) = &self.on_settled {
                    callback(Some(data), None, &variables);
                }
            }
            Err(err) => {
                debug!(error = %err, "mutation failed");
                *self.state.lock() = MutationState {
                    error: Some(err.clone()),
                    is_error: true,
                    ..MutationState::default()
                };
                if let Some(callback) = &self.on_error {
                    callback(err, &variables);
                }
                if let Some(callback) = &self.on_settled {
                    callback(None, Some(err), &variables);
                }
            }
        }

        outcome
    }

    pub fn state(&self) -> MutationState<D> {
        self.state.lock().clone()
    }

    pub fn reset(&self) {
        *self.state.lock() = MutationState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_success_runs_callbacks_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (on_ok, on_done) = (Arc::clone(&log), Arc::clone(&log));

        let mutation = Mutation::new(|name: String| async move {
            Ok::<_, String>(format!("created {}", name))
        })
        .on_success(move |data: &String, _vars: &String| on_ok.lock().push(data.clone()))
        .on_settled(move |data, err, _vars| {
            on_done
                .lock()
                .push(format!("settled {} {}", data.is_some(), err.is_some()))
        });

        let result = mutation.mutate("report".to_string()).await;

        tokio_test::assert_ok!(&result);
        assert_eq!(
            *log.lock(),
            vec!["created report".to_string(), "settled true false".to_string()]
        );
        let state = mutation.state();
        assert!(state.is_success);
        assert_eq!(state.data.as_deref(), Some("created report"));
    }

    #[tokio::test]
    async fn test_error_sets_state_and_calls_on_error() {
        let errors = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&errors);

        let mutation: Mutation<u32, u32> =
            Mutation::new(|id: u32| async move { Err::<u32, _>(format!("no ticket {}", id)) })
                .on_error(move |err, vars| seen.lock().push((err.clone(), *vars)));

        let result = mutation.mutate(9).await;

        tokio_test::assert_err!(&result);
        assert_eq!(
            *errors.lock(),
            vec![(QueryError::Fetch("no ticket 9".into()), 9)]
        );
        let state = mutation.state();
        assert!(state.is_error);
        assert!(!state.is_loading);

        mutation.reset();
        let state = mutation.state();
        assert!(!state.is_error);
        assert!(state.error.is_none());
    }
}
