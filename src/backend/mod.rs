//! Storage executors
//!
//! A [`Backend`] opens transactional [`Session`]s and reports table shapes. A
//! session executes compiled statements. Dropping a session without calling
//! [`Session::commit`] rolls it back.

pub mod memory;
pub mod postgres;

use std::future::Future;

use crate::error::BackendError;
use crate::schema::IntrospectedTable;
use crate::statement::{Count, Delete, Insert, Select, Update};
use crate::types::Record;

pub use memory::{MemoryBackend, MemorySession};
pub use postgres::{PgBackend, PgSession};

pub type BackendResult<T> = std::result::Result<T, BackendError>;

pub trait Backend: Send + Sync {
    type Session: Session;

    /// Open a session with a transaction already begun
    fn begin(&self) -> impl Future<Output = BackendResult<Self::Session>> + Send;

    /// Column set and primary key of `table`, or None when it does not exist
    fn introspect(
        &self,
        table: &str,
    ) -> impl Future<Output = BackendResult<Option<IntrospectedTable>>> + Send;
}

pub trait Session: Send {
    /// Rows keyed by the select's column labels
    fn fetch_all(&mut self, select: &Select) -> impl Future<Output = BackendResult<Vec<Record>>> + Send;

    fn fetch_optional(
        &mut self,
        select: &Select,
    ) -> impl Future<Output = BackendResult<Option<Record>>> + Send {
        async move {
            let mut first = select.clone();
            first.limit = Some(select.limit.map_or(1, |limit| limit.min(1)));
            Ok(self.fetch_all(&first).await?.into_iter().next())
        }
    }

    fn count(&mut self, count: &Count) -> impl Future<Output = BackendResult<u64>> + Send;

    /// Insert one row and return it as stored
    fn insert(&mut self, insert: &Insert) -> impl Future<Output = BackendResult<Record>> + Send;

    /// Rows affected, plus the returned rows when the update asks for any
    fn update(
        &mut self,
        update: &Update,
    ) -> impl Future<Output = BackendResult<(u64, Vec<Record>)>> + Send;

    fn delete(&mut self, delete: &Delete) -> impl Future<Output = BackendResult<u64>> + Send;

    fn commit(self) -> impl Future<Output = BackendResult<()>> + Send;

    fn rollback(self) -> impl Future<Output = BackendResult<()>> + Send;
}
