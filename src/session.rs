//! Transaction scoping for engine operations
//!
//! Every operation runs in exactly one session. A caller-supplied session is
//! joined and left open; otherwise the operation opens its own, commits it on
//! success and rolls it back on failure. Dropping the operation future drops an
//! owned session, which rolls it back as well.

use crate::backend::{Backend, BackendResult, Session};
use crate::error::{BackendError, EngineError, Result};

/// What an operation is doing, for diagnostics on storage failure
#[derive(Debug, Clone)]
pub struct OpContext {
    entity: String,
    operation: String,
    arguments: String,
}

impl OpContext {
    pub fn new(
        entity: impl Into<String>,
        operation: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            entity: entity.into(),
            operation: operation.into(),
            arguments: arguments.into(),
        }
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Log a storage failure and wrap it as [`EngineError::StorageOperation`]
    pub fn storage_error(&self, source: BackendError) -> EngineError {
        tracing::error!(
            entity = %self.entity,
            operation = %self.operation,
            arguments = %self.arguments,
            error = %source,
            "storage operation failed"
        );
        EngineError::StorageOperation {
            entity: self.entity.clone(),
            operation: self.operation.clone(),
            arguments: self.arguments.clone(),
            source,
        }
    }

    pub fn storage<T>(&self, result: BackendResult<T>) -> Result<T> {
        result.map_err(|e| self.storage_error(e))
    }
}

/// A session an operation runs in: the caller's, or one it owns
#[derive(Debug)]
pub enum Scope<'a, S: Session> {
    Joined(&'a mut S),
    Owned(S),
}

impl<'a, S: Session> Scope<'a, S> {
    /// Join `caller` when given, otherwise begin a new session on `backend`
    pub async fn enter<B>(backend: &B, caller: Option<&'a mut S>, ctx: &OpContext) -> Result<Self>
    where
        B: Backend<Session = S>,
    {
        match caller {
            Some(session) => Ok(Scope::Joined(session)),
            None => {
                let session = ctx.storage(backend.begin().await)?;
                tracing::debug!(operation = ctx.operation(), "session opened");
                Ok(Scope::Owned(session))
            }
        }
    }

    pub fn session(&mut self) -> &mut S {
        match self {
            Scope::Joined(session) => session,
            Scope::Owned(session) => session,
        }
    }

    pub fn is_owned(&self) -> bool {
        matches!(self, Scope::Owned(_))
    }

    /// Close the scope with the operation's outcome.
    ///
    /// An owned session commits on success and rolls back on failure; a
    /// joined session is left to its owner.
    pub async fn finish<T>(self, result: Result<T>, ctx: &OpContext) -> Result<T> {
        let Scope::Owned(session) = self else {
            return result;
        };

        match result {
            Ok(value) => {
                ctx.storage(session.commit().await)?;
                tracing::debug!(operation = ctx.operation(), "session committed");
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = session.rollback().await {
                    tracing::warn!(
                        operation = ctx.operation(),
                        error = %rollback,
                        "rollback failed"
                    );
                }
                tracing::debug!(operation = ctx.operation(), "session rolled back");
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use crate::schema::tests::users;
    use crate::statement::Insert;
    use serde_json::json;
    use std::sync::Arc;

    fn insert(id: i64) -> Insert {
        Insert {
            into: Arc::new(users()),
            values: json!({"id": id, "name": "n"}).as_object().unwrap().clone(),
        }
    }

    #[tokio::test]
    async fn test_owned_scope_commits_on_success() {
        let backend = MemoryBackend::new();
        backend.create_table(&users()).await;
        let ctx = OpContext::new("users", "create", "");

        let mut scope = Scope::enter(&backend, None, &ctx).await.unwrap();
        assert!(scope.is_owned());
        scope.session().insert(&insert(1)).await.unwrap();
        scope.finish(Ok(()), &ctx).await.unwrap();

        assert_eq!(backend.rows("users").await.len(), 1);
    }

    #[tokio::test]
    async fn test_owned_scope_rolls_back_on_error() {
        let backend = MemoryBackend::new();
        backend.create_table(&users()).await;
        let ctx = OpContext::new("users", "create", "");

        let mut scope = Scope::enter(&backend, None, &ctx).await.unwrap();
        scope.session().insert(&insert(1)).await.unwrap();
        let result: Result<()> = scope
            .finish(Err(EngineError::not_found("gone")), &ctx)
            .await;

        assert!(matches!(result, Err(EngineError::NotFound(_))));
        assert!(backend.rows("users").await.is_empty());
    }

    #[tokio::test]
    async fn test_joined_scope_never_commits() {
        let backend = MemoryBackend::new();
        backend.create_table(&users()).await;
        let ctx = OpContext::new("users", "create", "");

        let mut outer = backend.begin().await.unwrap();
        let mut scope = Scope::enter(&backend, Some(&mut outer), &ctx).await.unwrap();
        assert!(!scope.is_owned());
        scope.session().insert(&insert(1)).await.unwrap();
        scope.finish(Ok(()), &ctx).await.unwrap();

        drop(outer);
        assert!(backend.rows("users").await.is_empty());
    }

    #[tokio::test]
    async fn test_dropped_scope_rolls_back() {
        let backend = MemoryBackend::new();
        backend.create_table(&users()).await;
        let ctx = OpContext::new("users", "create", "");

        {
            let mut scope = Scope::enter(&backend, None, &ctx).await.unwrap();
            scope.session().insert(&insert(1)).await.unwrap();
        }

        assert!(backend.rows("users").await.is_empty());
    }

    #[test]
    fn test_storage_error_carries_context() {
        let ctx = OpContext::new("users", "update", "id=1");
        let err = ctx.storage_error(BackendError::constraint("duplicate key"));
        match err {
            EngineError::StorageOperation {
                entity,
                operation,
                arguments,
                source,
            } => {
                assert_eq!(entity, "users");
                assert_eq!(operation, "update");
                assert_eq!(arguments, "id=1");
                assert!(matches!(source, BackendError::Constraint(_)));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
