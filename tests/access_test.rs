mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use async_trait::async_trait;
use common::{test_config, TestApp};
use mockall::mock;
use toolroom::{
    auth::{IdentityProvider, Session},
    commands::{
        Command, ListUsersCommand, LoginUser, RegisterToolCommand, RegisterUserCommand,
        RegisterWithdrawalCommand, RetireToolCommand, UserListing,
    },
    entities::{Role, ToolType},
    services::{catalog::CreateToolInput, profiles::RegisterProfileInput},
    ServiceError,
};
use uuid::Uuid;

mock! {
    pub Identity {}

    #[async_trait]
    impl IdentityProvider for Identity {
        async fn sign_up(&self, email: &str, password: &str) -> Result<Uuid, ServiceError>;
        async fn sign_in(&self, email: &str, password: &str) -> Result<Session, ServiceError>;
        async fn sign_out(&self) -> Result<(), ServiceError>;
        async fn current_session(&self) -> Result<Option<Session>, ServiceError>;
    }
}

fn drill() -> CreateToolInput {
    CreateToolInput {
        name: "Drill".to_string(),
        brand: "Bosch".to_string(),
        serial: "SN-1".to_string(),
        tool_type: ToolType::Electrical,
        description: None,
    }
}

fn profile_input(email: &str, password: &str) -> RegisterProfileInput {
    RegisterProfileInput {
        email: email.to_string(),
        password: password.to_string(),
        first_name: "Dana".to_string(),
        last_name: "Reis".to_string(),
        role: Role::User,
    }
}

#[tokio::test]
async fn user_role_cannot_manage_catalog_but_admin_can() {
    let app = TestApp::new().await;
    let user = app.register_user("Ana", "Souza", Role::User).await;
    let admin = app.register_user("Beto", "Alves", Role::Admin).await;

    let err = RegisterToolCommand { input: drill() }
        .execute(&app.services, &user)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Forbidden(_));

    let tool = RegisterToolCommand { input: drill() }
        .execute(&app.services, &admin)
        .await
        .unwrap();

    let err = RetireToolCommand { tool_id: tool.id }
        .execute(&app.services, &user)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Forbidden(_));
}

#[tokio::test]
async fn user_role_may_record_movements() {
    let app = TestApp::new().await;
    let user = app.register_user("Ana", "Souza", Role::User).await;
    let tool = app.register_tool("Drill", "SN-1", ToolType::Electrical).await;

    let movement = RegisterWithdrawalCommand {
        tool_id: tool.id,
        responsible_id: user.user_id,
        location: "Site A".to_string(),
        withdrawn_at: None,
        notes: None,
    }
    .execute(&app.services, &user)
    .await
    .unwrap();

    assert_eq!(movement.responsible_id, user.user_id);
    assert!(movement.entry_at.is_none());
}

#[tokio::test]
async fn only_admin_registers_users() {
    let app = TestApp::new().await;
    let user = app.register_user("Ana", "Souza", Role::User).await;

    let err = RegisterUserCommand {
        input: profile_input("dana@example.com", "secret-pass"),
    }
    .execute(&app.services, &user)
    .await
    .unwrap_err();
    assert_matches!(err, ServiceError::Forbidden(_));

    let profile = RegisterUserCommand {
        input: profile_input("Dana@Example.com", "secret-pass"),
    }
    .execute(&app.services, &app.admin())
    .await
    .unwrap();
    assert_eq!(profile.email, "dana@example.com");
}

#[tokio::test]
async fn profile_registration_validates_input() {
    let app = TestApp::new().await;

    let short_password = app
        .services
        .profiles
        .register(profile_input("dana@example.com", "12345"))
        .await
        .unwrap_err();
    assert_matches!(short_password, ServiceError::ValidationError(_));

    let bad_email = app
        .services
        .profiles
        .register(profile_input("not-an-email", "secret-pass"))
        .await
        .unwrap_err();
    assert_matches!(bad_email, ServiceError::ValidationError(_));

    app.services
        .profiles
        .register(profile_input("dana@example.com", "secret-pass"))
        .await
        .unwrap();
    let duplicate = app
        .services
        .profiles
        .register(profile_input("DANA@example.com", "secret-pass"))
        .await
        .unwrap_err();
    assert_matches!(duplicate, ServiceError::Conflict(_));
    assert_eq!(app.services.profiles.count().await.unwrap(), 1);
}

#[tokio::test]
async fn simple_listing_is_sorted_by_first_name() {
    let app = TestApp::new().await;
    app.register_user("Carla", "Mendes", Role::User).await;
    app.register_user("Ana", "Souza", Role::User).await;
    app.register_user("Bruno", "Lima", Role::Admin).await;

    let listing = ListUsersCommand { simple: true }
        .execute(&app.services, &app.admin())
        .await
        .unwrap();

    let UserListing::Simple(entries) = listing else {
        panic!("expected the simple listing");
    };
    let names: Vec<_> = entries.iter().map(|p| p.full_name.as_str()).collect();
    assert_eq!(names, vec!["Ana Souza", "Bruno Lima", "Carla Mendes"]);
}

#[tokio::test]
async fn login_resolves_principal_with_stored_role() {
    let account_id = Uuid::new_v4();
    let mut identity = MockIdentity::new();
    identity
        .expect_sign_up()
        .times(1)
        .returning(move |_, _| Ok(account_id));
    identity.expect_sign_in().times(1).returning(move |email, _| {
        Ok(Session {
            user_id: account_id,
            email: email.to_string(),
        })
    });

    let app = TestApp::with_identity(test_config(), Arc::new(identity)).await;
    let mut input = profile_input("dana@example.com", "secret-pass");
    input.role = Role::Admin;
    let profile = app.services.profiles.register(input).await.unwrap();
    assert_eq!(profile.id, account_id);

    let principal = LoginUser {
        email: "dana@example.com".to_string(),
        password: "secret-pass".to_string(),
    }
    .execute(&app.services)
    .await
    .unwrap();

    assert_eq!(principal.user_id, account_id);
    assert!(principal.is_admin());
}

#[tokio::test]
async fn login_without_profile_is_forbidden() {
    let mut identity = MockIdentity::new();
    identity.expect_sign_in().returning(|email, _| {
        Ok(Session {
            user_id: Uuid::new_v4(),
            email: email.to_string(),
        })
    });

    let app = TestApp::with_identity(test_config(), Arc::new(identity)).await;
    let err = LoginUser {
        email: "ghost@example.com".to_string(),
        password: "secret-pass".to_string(),
    }
    .execute(&app.services)
    .await
    .unwrap_err();

    assert_matches!(err, ServiceError::Forbidden(_));
}

#[tokio::test]
async fn rejected_credentials_surface_identity_error() {
    let mut identity = MockIdentity::new();
    identity
        .expect_sign_in()
        .returning(|_, _| Err(ServiceError::IdentityError("invalid credentials".to_string())));

    let app = TestApp::with_identity(test_config(), Arc::new(identity)).await;
    let err = LoginUser {
        email: "dana@example.com".to_string(),
        password: "wrong-pass".to_string(),
    }
    .execute(&app.services)
    .await
    .unwrap_err();

    assert_matches!(err, ServiceError::IdentityError(_));
    assert_eq!(err.exit_code(), 5);
}

#[tokio::test]
async fn local_identity_refuses_password_sign_in() {
    let app = TestApp::new().await;
    app.register_user("Ana", "Souza", Role::User).await;

    let err = LoginUser {
        email: "ana.souza@example.com".to_string(),
        password: "secret-pass".to_string(),
    }
    .execute(&app.services)
    .await
    .unwrap_err();

    assert_matches!(err, ServiceError::IdentityError(_));
}
