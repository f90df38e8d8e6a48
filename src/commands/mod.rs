use crate::{auth::Principal, errors::ServiceError, services::AppServices};
use async_trait::async_trait;

/// Command trait for implementing the Command Pattern
///
/// Each use case is one object: it validates its own input, checks that the
/// acting principal holds the needed permission, and then calls the services.
#[async_trait]
pub trait Command: Send + Sync {
    /// The return type of the command when executed successfully
    type Result;

    /// Execute the command on behalf of `actor`
    ///
    /// # Returns
    /// * `Result<Self::Result, ServiceError>` - The result of command execution or an error
    async fn execute(
        &self,
        services: &AppServices,
        actor: &Principal,
    ) -> Result<Self::Result, ServiceError>;
}

pub mod movements;
pub mod reconcile;
pub mod tools;
pub mod users;

pub use movements::{
    ListAllMovementsCommand, ListPendingMovementsCommand, RegisterEntryCommand,
    RegisterReturnCommand, RegisterWithdrawalCommand, ToolHistoryCommand,
};
pub use reconcile::ReconcileCommand;
pub use tools::{
    GetToolCommand, ListToolsCommand, RegisterToolCommand, RetireToolCommand, UpdateToolCommand,
};
pub use users::{ListUsersCommand, LoginUser, RegisterUserCommand, UserListing};
