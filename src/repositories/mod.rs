use sea_orm::ConnectionTrait;

pub mod history_repository;
pub mod profile_repository;
pub mod tool_repository;

pub use history_repository::HistoryRepository;
pub use profile_repository::ProfileRepository;
pub use tool_repository::{like_pattern, ToolFilter, ToolRepository, ToolSort};

/// Repository trait for common database operations.
///
/// The connection is either the pool or an open transaction, so the same
/// repository code runs inside and outside a unit of work.
pub trait Repository {
    type Conn: ConnectionTrait;

    fn get_db(&self) -> &Self::Conn;
}

#[derive(Debug)]
pub struct BaseRepository<'c, C> {
    db: &'c C,
}

impl<'c, C: ConnectionTrait> BaseRepository<'c, C> {
    pub fn new(db: &'c C) -> Self {
        Self { db }
    }
}

impl<'c, C: ConnectionTrait> Repository for BaseRepository<'c, C> {
    type Conn = C;

    fn get_db(&self) -> &C {
        self.db
    }
}
