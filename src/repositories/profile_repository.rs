use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder,
};
use uuid::Uuid;

use crate::entities::profile::{
    ActiveModel as ProfileActiveModel, Column, Entity as Profile, Model as ProfileModel,
};
use crate::errors::ServiceError;
use crate::repositories::Repository;

use super::BaseRepository;

/// Repository for profile rows
#[derive(Debug)]
pub struct ProfileRepository<'c, C> {
    base: BaseRepository<'c, C>,
}

impl<'c, C: ConnectionTrait> ProfileRepository<'c, C> {
    pub fn new(db: &'c C) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<ProfileModel>, ServiceError> {
        Profile::find_by_id(id)
            .one(self.base.get_db())
            .await
            .map_err(ServiceError::db_error)
    }

    pub async fn get(&self, id: Uuid) -> Result<ProfileModel, ServiceError> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Profile with ID {} not found", id)))
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<ProfileModel>, ServiceError> {
        Profile::find()
            .filter(Column::Email.eq(email))
            .one(self.base.get_db())
            .await
            .map_err(ServiceError::db_error)
    }

    pub async fn find_by_ids(&self, ids: Vec<Uuid>) -> Result<Vec<ProfileModel>, ServiceError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        Profile::find()
            .filter(Column::Id.is_in(ids))
            .all(self.base.get_db())
            .await
            .map_err(ServiceError::db_error)
    }

    pub async fn find_newest_first(&self) -> Result<Vec<ProfileModel>, ServiceError> {
        Profile::find()
            .order_by_desc(Column::CreatedAt)
            .all(self.base.get_db())
            .await
            .map_err(ServiceError::db_error)
    }

    pub async fn find_by_first_name(&self) -> Result<Vec<ProfileModel>, ServiceError> {
        Profile::find()
            .order_by_asc(Column::FirstName)
            .order_by_asc(Column::LastName)
            .all(self.base.get_db())
            .await
            .map_err(ServiceError::db_error)
    }

    pub async fn count(&self) -> Result<u64, ServiceError> {
        Profile::find()
            .count(self.base.get_db())
            .await
            .map_err(ServiceError::db_error)
    }

    pub async fn create(&self, profile: ProfileActiveModel) -> Result<ProfileModel, ServiceError> {
        profile
            .insert(self.base.get_db())
            .await
            .map_err(|e| ServiceError::from_write(e, "profile email already registered"))
    }
}

impl<'c, C: ConnectionTrait> Repository for ProfileRepository<'c, C> {
    type Conn = C;

    fn get_db(&self) -> &C {
        self.base.get_db()
    }
}
