//! sea-orm entities for the tool inventory tables.

pub mod profile;
pub mod tool;
pub mod tool_history;

pub use profile::{Entity as Profile, Model as ProfileModel, Role};
pub use tool::{Entity as Tool, Model as ToolModel, ToolStatus, ToolType, STORAGE_LOCATION};
pub use tool_history::{Entity as ToolHistory, Model as HistoryModel};
