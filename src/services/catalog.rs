//! Tool catalog: registration, lookup, listing and descriptive edits.

use chrono::Utc;
use sea_orm::{ActiveValue::Set, DatabaseConnection};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::config::CatalogConfig;
use crate::entities::tool::ActiveModel as ToolActiveModel;
use crate::entities::{ToolModel, ToolStatus, ToolType};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::repositories::{ToolFilter, ToolRepository, ToolSort};

/// Columns only the movement ledger may write.
const LEDGER_OWNED_FIELDS: [&str; 4] = [
    "current_location",
    "current_responsible",
    "currentLocation",
    "currentResponsible",
];

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateToolInput {
    #[validate(length(min = 1, max = 120))]
    pub name: String,
    #[validate(length(min = 1, max = 120))]
    pub brand: String,
    #[validate(length(min = 1, max = 64))]
    pub serial: String,
    pub tool_type: ToolType,
    #[validate(length(max = 2000))]
    pub description: Option<String>,
}

/// Descriptive fields of a tool. Location and responsible belong to the ledger.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct UpdateToolInput {
    #[validate(length(min = 1, max = 120))]
    pub name: Option<String>,
    #[validate(length(min = 1, max = 120))]
    pub brand: Option<String>,
    #[validate(length(min = 1, max = 64))]
    pub serial: Option<String>,
    pub tool_type: Option<ToolType>,
    pub status: Option<ToolStatus>,
    /// `Some("")` clears the description
    #[validate(length(max = 2000))]
    pub description: Option<String>,
}

impl UpdateToolInput {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.brand.is_none()
            && self.serial.is_none()
            && self.tool_type.is_none()
            && self.status.is_none()
            && self.description.is_none()
    }

    /// Fields set on `self` win over those on `other`.
    pub fn merge(self, other: UpdateToolInput) -> UpdateToolInput {
        UpdateToolInput {
            name: self.name.or(other.name),
            brand: self.brand.or(other.brand),
            serial: self.serial.or(other.serial),
            tool_type: self.tool_type.or(other.tool_type),
            status: self.status.or(other.status),
            description: self.description.or(other.description),
        }
    }
}

/// Untyped key/value edit, as received from loosely typed callers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolPatch {
    pub fields: BTreeMap<String, Value>,
}

impl ToolPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Parses `key=value` pairs.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = &'a str>) -> Result<Self, ServiceError> {
        let mut patch = ToolPatch::new();
        for pair in pairs {
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                ServiceError::ValidationError(format!("expected key=value, got '{}'", pair))
            })?;
            patch = patch.set(key.trim(), value.trim());
        }
        Ok(patch)
    }

    /// Converts into a typed update, refusing any ledger-owned key.
    pub fn into_update(self) -> Result<UpdateToolInput, ServiceError> {
        if let Some(key) = self
            .fields
            .keys()
            .find(|key| LEDGER_OWNED_FIELDS.contains(&key.as_str()))
        {
            return Err(ServiceError::InvalidOperation(format!(
                "'{}' is maintained by the movement ledger and cannot be edited",
                key
            )));
        }

        let mut input = UpdateToolInput::default();
        for (key, value) in self.fields {
            match key.as_str() {
                "name" => input.name = Some(text(&key, value)?),
                "brand" => input.brand = Some(text(&key, value)?),
                "serial" => input.serial = Some(text(&key, value)?),
                "description" => {
                    input.description = Some(match value {
                        Value::Null => String::new(),
                        other => text(&key, other)?,
                    })
                }
                "tool_type" | "type" => input.tool_type = Some(parse_enum(&key, value)?),
                "status" => input.status = Some(parse_enum(&key, value)?),
                _ => {
                    return Err(ServiceError::ValidationError(format!(
                        "unknown tool field '{}'",
                        key
                    )))
                }
            }
        }
        Ok(input)
    }
}

fn text(key: &str, value: Value) -> Result<String, ServiceError> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(ServiceError::ValidationError(format!(
            "field '{}' expects text, got {}",
            key, other
        ))),
    }
}

fn parse_enum<T: FromStr>(key: &str, value: Value) -> Result<T, ServiceError> {
    let raw = text(key, value)?;
    raw.parse::<T>()
        .map_err(|_| ServiceError::ValidationError(format!("invalid {} '{}'", key, raw)))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolQuery {
    /// Zero-based page index
    pub page: u64,
    pub filter: ToolFilter,
    pub sort_by: ToolSort,
    pub ascending: bool,
    /// Overrides the configured page size, up to `catalog.max_page_size`
    pub page_size: Option<u64>,
}

impl Default for ToolQuery {
    fn default() -> Self {
        Self {
            page: 0,
            filter: ToolFilter::default(),
            sort_by: ToolSort::default(),
            ascending: true,
            page_size: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolPage {
    pub items: Vec<ToolModel>,
    pub total: u64,
    pub page: u64,
    pub page_size: u64,
}

impl ToolPage {
    pub fn page_count(&self) -> u64 {
        if self.page_size == 0 {
            return 0;
        }
        self.total.div_ceil(self.page_size)
    }
}

fn required(value: &str, field: &str) -> Result<String, ServiceError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ServiceError::ValidationError(format!(
            "{} must not be blank",
            field
        )));
    }
    Ok(trimmed.to_string())
}

#[derive(Clone)]
pub struct CatalogService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    settings: CatalogConfig,
    storage_location: String,
}

impl CatalogService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        settings: CatalogConfig,
        storage_location: String,
    ) -> Self {
        Self {
            db,
            event_sender,
            settings,
            storage_location,
        }
    }

    /// Registers a tool in storage with status Active.
    #[instrument(skip(self))]
    pub async fn register(&self, input: CreateToolInput) -> Result<ToolModel, ServiceError> {
        input.validate()?;
        let name = required(&input.name, "name")?;
        let brand = required(&input.brand, "brand")?;
        let serial = required(&input.serial, "serial")?;

        let tools = ToolRepository::new(self.db.as_ref());
        if tools.find_by_serial(&serial).await?.is_some() {
            return Err(ServiceError::Conflict(format!(
                "A tool with serial {} is already registered",
                serial
            )));
        }

        let tool = tools
            .create(ToolActiveModel {
                id: Set(Uuid::new_v4()),
                name: Set(name),
                brand: Set(brand),
                serial: Set(serial),
                tool_type: Set(input.tool_type),
                status: Set(ToolStatus::Active),
                current_location: Set(self.storage_location.clone()),
                current_responsible: Set(None),
                description: Set(input
                    .description
                    .map(|d| d.trim().to_string())
                    .filter(|d| !d.is_empty())),
                created_at: Set(Utc::now()),
                // search columns are derived in `before_save`
                ..Default::default()
            })
            .await?;

        info!(tool_id = %tool.id, serial = %tool.serial, "Tool registered");
        self.event_sender
            .send_or_log(Event::ToolRegistered(tool.id))
            .await;

        Ok(tool)
    }

    #[instrument(skip(self))]
    pub async fn get(&self, id: Uuid) -> Result<ToolModel, ServiceError> {
        ToolRepository::new(self.db.as_ref()).get(id).await
    }

    /// Filtered, sorted page of tools.
    #[instrument(skip(self))]
    pub async fn list(&self, query: ToolQuery) -> Result<ToolPage, ServiceError> {
        let page_size = match query.page_size {
            None => self.settings.page_size,
            Some(0) => {
                return Err(ServiceError::ValidationError(
                    "page size must be positive".to_string(),
                ))
            }
            Some(size) if size > self.settings.max_page_size => {
                return Err(ServiceError::ValidationError(format!(
                    "page size {} exceeds the maximum of {}",
                    size, self.settings.max_page_size
                )))
            }
            Some(size) => size,
        };
        // the offset must fit a signed 64-bit OFFSET clause
        if query
            .page
            .checked_mul(page_size)
            .map_or(true, |offset| offset > i64::MAX as u64)
        {
            return Err(ServiceError::ValidationError(format!(
                "page {} is out of range",
                query.page
            )));
        }

        let (items, total) = ToolRepository::new(self.db.as_ref())
            .find_page(
                &query.filter,
                query.sort_by,
                query.ascending,
                query.page,
                page_size,
            )
            .await?;

        Ok(ToolPage {
            items,
            total,
            page: query.page,
            page_size,
        })
    }

    /// Edits descriptive fields; an empty edit is rejected.
    #[instrument(skip(self))]
    pub async fn update(&self, id: Uuid, input: UpdateToolInput) -> Result<ToolModel, ServiceError> {
        if input.is_empty() {
            return Err(ServiceError::ValidationError(
                "update must change at least one field".to_string(),
            ));
        }
        input.validate()?;

        let tools = ToolRepository::new(self.db.as_ref());
        let mut changes = ToolActiveModel::default();

        if let Some(name) = input.name.as_deref() {
            changes.name = Set(required(name, "name")?);
        }
        if let Some(brand) = input.brand.as_deref() {
            changes.brand = Set(required(brand, "brand")?);
        }
        if let Some(serial) = input.serial.as_deref() {
            let serial = required(serial, "serial")?;
            if let Some(existing) = tools.find_by_serial(&serial).await? {
                if existing.id != id {
                    return Err(ServiceError::Conflict(format!(
                        "A tool with serial {} is already registered",
                        serial
                    )));
                }
            }
            changes.serial = Set(serial);
        }
        if let Some(tool_type) = input.tool_type {
            changes.tool_type = Set(tool_type);
        }
        if let Some(status) = input.status {
            changes.status = Set(status);
        }
        if let Some(description) = input.description.as_deref() {
            let description = description.trim();
            changes.description = Set((!description.is_empty()).then(|| description.to_string()));
        }

        let tool = tools.update(id, changes).await?;

        info!(tool_id = %tool.id, "Tool updated");
        self.event_sender
            .send_or_log(Event::ToolUpdated(tool.id))
            .await;

        Ok(tool)
    }

    /// Applies an untyped edit after checking it stays off ledger-owned fields.
    #[instrument(skip(self))]
    pub async fn apply_patch(&self, id: Uuid, patch: ToolPatch) -> Result<ToolModel, ServiceError> {
        let input = patch.into_update()?;
        self.update(id, input).await
    }

    /// Retires a tool by marking it Inactive. Rows are never deleted.
    #[instrument(skip(self))]
    pub async fn soft_delete(&self, id: Uuid) -> Result<ToolModel, ServiceError> {
        let tool = ToolRepository::new(self.db.as_ref())
            .update(
                id,
                ToolActiveModel {
                    status: Set(ToolStatus::Inactive),
                    ..Default::default()
                },
            )
            .await?;

        info!(tool_id = %tool.id, "Tool retired");
        self.event_sender
            .send_or_log(Event::ToolRetired(tool.id))
            .await;

        Ok(tool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rstest::rstest;

    #[rstest]
    #[case("current_location")]
    #[case("current_responsible")]
    #[case("currentLocation")]
    fn patch_touching_ledger_fields_is_refused(#[case] key: &str) {
        let patch = ToolPatch::new().set("name", "Saw").set(key, "Site A");
        assert_matches!(patch.into_update(), Err(ServiceError::InvalidOperation(msg)) if msg.contains(key));
    }

    #[test]
    fn patch_parses_typed_fields() {
        let patch = ToolPatch::from_pairs(["name=Saw", "type=height-equipment", "status=Lost"]).unwrap();
        let input = patch.into_update().unwrap();
        assert_eq!(input.name.as_deref(), Some("Saw"));
        assert_eq!(input.tool_type, Some(ToolType::HeightEquipment));
        assert_eq!(input.status, Some(ToolStatus::Lost));
    }

    #[test]
    fn patch_rejects_unknown_keys_and_bad_values() {
        assert_matches!(
            ToolPatch::new().set("colour", "red").into_update(),
            Err(ServiceError::ValidationError(_))
        );
        assert_matches!(
            ToolPatch::new().set("status", "Borrowed").into_update(),
            Err(ServiceError::ValidationError(_))
        );
        assert_matches!(
            ToolPatch::new().set("name", 12).into_update(),
            Err(ServiceError::ValidationError(_))
        );
        assert_matches!(ToolPatch::from_pairs(["name"]), Err(ServiceError::ValidationError(_)));
    }

    #[test]
    fn null_description_clears_it() {
        let input = ToolPatch::new()
            .set("description", Value::Null)
            .into_update()
            .unwrap();
        assert_eq!(input.description.as_deref(), Some(""));
    }

    #[test]
    fn merge_prefers_explicit_fields() {
        let typed = UpdateToolInput {
            name: Some("Typed".into()),
            ..Default::default()
        };
        let patched = UpdateToolInput {
            name: Some("Patched".into()),
            brand: Some("Makita".into()),
            ..Default::default()
        };
        let merged = typed.merge(patched);
        assert_eq!(merged.name.as_deref(), Some("Typed"));
        assert_eq!(merged.brand.as_deref(), Some("Makita"));
        assert!(UpdateToolInput::default().is_empty());
    }

    #[test]
    fn page_count_rounds_up() {
        let page = ToolPage {
            items: vec![],
            total: 21,
            page: 0,
            page_size: 10,
        };
        assert_eq!(page.page_count(), 3);
    }
}
