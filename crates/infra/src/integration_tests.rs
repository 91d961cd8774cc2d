//! Integration tests for the session and authorization pipeline.
//!
//! Tests: seed → login → switch → authorize → terminate, on the in-memory store.
//!
//! Verifies:
//! - Session state gates every credential
//! - Platform grants apply inside systems, system grants never leak out
//! - Store failures are reported, never turned into a denial

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Utc;
    use uuid::Uuid;

    use portico_auth::{
        AccessAdmin, AuthError, AuthStore, CredentialCodec, DeviceRegistry, LoginRequest, NewDevice,
        NewPermission, NewSession, NewUser, Requirement, SessionManager, SharedStore, StoreError,
        TokenConfig, TokenKind,
    };
    use portico_core::{
        ActionId, DevicePlatform, LogoutReason, Menu, MenuId, Module, ModuleId, Role, RoleId,
        SessionId, SystemScope, UserId,
    };

    use crate::seed::{self, SeedOptions, ADMIN_SYSTEM, DSL_ADMIN, DSL_SYSTEM, DSL_VIEWER, SUPER_ADMIN};
    use crate::store::InMemoryAuthStore;
    use crate::workers::SessionSweeper;

    struct Harness {
        store: Arc<InMemoryAuthStore>,
        shared: SharedStore,
        sessions: SessionManager,
    }

    impl Harness {
        fn admin(&self) -> AccessAdmin {
            AccessAdmin::new(self.shared.clone())
        }

        fn devices(&self) -> DeviceRegistry {
            DeviceRegistry::new(self.shared.clone())
        }
    }

    async fn setup_with_timeout(call_timeout: Duration) -> Harness {
        let store = Arc::new(InMemoryAuthStore::new());
        seed::run(store.as_ref(), &SeedOptions::default()).await.unwrap();
        let shared = SharedStore::new(store.clone(), call_timeout);
        let sessions = SessionManager::new(shared.clone(), CredentialCodec::new(TokenConfig::new("test-secret")));
        Harness { store, shared, sessions }
    }

    async fn setup() -> Harness {
        setup_with_timeout(Duration::from_secs(5)).await
    }

    fn login_request(device_uid: &str) -> LoginRequest {
        LoginRequest {
            email: "admin@gerege.mn".to_string(),
            password: "Admin@123".to_string(),
            device_uid: device_uid.to_string(),
            ip_address: "10.0.0.1".to_string(),
            user_agent: "integration-test".to_string(),
        }
    }

    fn device(uid: &str) -> NewDevice {
        NewDevice {
            device_uid: uid.to_string(),
            name: uid.to_string(),
            platform: DevicePlatform::Android,
            os_version: "14".to_string(),
            app_version: "1.0.0".to_string(),
            push_token: None,
            organization_id: None,
        }
    }

    async fn create_user(store: &InMemoryAuthStore, email: &str) -> UserId {
        store
            .create_user(NewUser {
                email: email.to_string(),
                password_hash: "unused".to_string(),
                first_name: "Test".to_string(),
                last_name: "User".to_string(),
                is_active: true,
                organization_id: None,
                default_system_id: None,
            })
            .await
            .unwrap()
            .id
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Login
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn login_opens_session_in_platform_scope() {
        let h = setup().await;

        let outcome = h.sessions.login(login_request("portico-web")).await.unwrap();
        assert_eq!(outcome.token_type, "Bearer");
        assert_eq!(outcome.expires_in, 24 * 3600);
        let codes: Vec<_> = outcome.available_systems.iter().map(|s| s.code.as_str()).collect();
        assert_eq!(codes, ["admin", "dsl"]);

        let auth = h.sessions.authenticate(&outcome.access_token).await.unwrap();
        assert_eq!(auth.scope(), SystemScope::Platform);
        assert_eq!(auth.session_id(), outcome.session.id);
        assert!(auth.session.current_system_id.is_none());
        assert!(h.sessions.is_session_valid(outcome.session.id).await.unwrap());

        let user = h.store.find_user_by_id(auth.user_id()).await.unwrap().unwrap();
        assert!(user.last_login_at.is_some());
    }

    #[tokio::test]
    async fn login_session_expires_after_the_platform_window() {
        let h = setup().await;
        let platform_ttl = h.sessions.codec().config().platform_ttl;

        let outcome = h.sessions.login(login_request("portico-web")).await.unwrap();
        assert_eq!(outcome.session.expires_at, outcome.session.created_at + platform_ttl);

        let stored = h.store.find_session(outcome.session.id).await.unwrap().unwrap();
        assert_eq!(stored.expires_at, stored.created_at + platform_ttl);
    }

    #[tokio::test]
    async fn login_failures_do_not_reveal_which_part_was_wrong() {
        let h = setup().await;

        let mut wrong_password = login_request("portico-web");
        wrong_password.password = "nope".to_string();
        assert!(matches!(
            h.sessions.login(wrong_password).await,
            Err(AuthError::InvalidCredentials)
        ));

        let mut unknown_user = login_request("portico-web");
        unknown_user.email = "ghost@gerege.mn".to_string();
        assert!(matches!(
            h.sessions.login(unknown_user).await,
            Err(AuthError::InvalidCredentials)
        ));

        assert!(h.sessions.active_sessions(Default::default()).await.unwrap().items.is_empty());
    }

    #[tokio::test]
    async fn login_requires_a_registered_active_device() {
        let h = setup().await;

        assert!(matches!(
            h.sessions.login(login_request("unknown-device")).await,
            Err(AuthError::DeviceNotFound)
        ));

        let tablet = h.devices().register(device("tablet-1")).await.unwrap();
        h.store.set_device_active(tablet.id, false).await.unwrap();
        assert!(matches!(
            h.sessions.login(login_request("tablet-1")).await,
            Err(AuthError::DeviceNotActive)
        ));

        // Re-registering keeps the administrator's decision.
        let again = h.devices().register(device("tablet-1")).await.unwrap();
        assert!(!again.is_active);
        assert!(matches!(h.devices().verify("tablet-1").await, Err(AuthError::DeviceNotActive)));
    }

    #[tokio::test]
    async fn empty_device_uid_is_rejected() {
        let h = setup().await;
        assert!(matches!(
            h.devices().register(device("  ")).await,
            Err(AuthError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn heartbeat_is_recorded_in_the_background() {
        let h = setup().await;
        h.devices().register(device("phone-1")).await.unwrap();

        h.devices().heartbeat("phone-1").await.unwrap();

        let stored = h.store.find_device_by_uid("phone-1").await.unwrap().unwrap();
        assert!(stored.last_heartbeat.is_some());
    }

    #[tokio::test]
    async fn inactive_user_cannot_log_in() {
        let h = setup().await;
        let store = h.store.clone();
        let email = "disabled@gerege.mn";
        store
            .create_user(NewUser {
                email: email.to_string(),
                password_hash: portico_auth::hash_password("Secret@1").unwrap(),
                first_name: String::new(),
                last_name: String::new(),
                is_active: false,
                organization_id: None,
                default_system_id: None,
            })
            .await
            .unwrap();

        let mut request = login_request("portico-web");
        request.email = email.to_string();
        request.password = "Secret@1".to_string();
        assert!(matches!(h.sessions.login(request).await, Err(AuthError::UserInactive)));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Tokens
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn refresh_token_is_not_an_access_credential() {
        let h = setup().await;
        let outcome = h.sessions.login(login_request("portico-web")).await.unwrap();

        assert!(matches!(
            h.sessions.authenticate(&outcome.refresh_token).await,
            Err(AuthError::InvalidToken)
        ));
        assert!(matches!(
            h.sessions.refresh(&outcome.access_token).await,
            Err(AuthError::InvalidToken)
        ));

        let pair = h.sessions.refresh(&outcome.refresh_token).await.unwrap();
        let auth = h.sessions.authenticate(&pair.access_token).await.unwrap();
        assert_eq!(auth.session_id(), outcome.session.id);
        assert_eq!(auth.claims.token_type, TokenKind::Platform);
    }

    #[tokio::test]
    async fn refresh_fails_once_the_session_is_gone() {
        let h = setup().await;
        let outcome = h.sessions.login(login_request("portico-web")).await.unwrap();
        h.sessions.logout(outcome.session.id, LogoutReason::User).await.unwrap();

        assert!(matches!(
            h.sessions.refresh(&outcome.refresh_token).await,
            Err(AuthError::SessionInvalid)
        ));
    }

    #[tokio::test]
    async fn token_from_another_secret_is_invalid() {
        let h = setup().await;
        let outcome = h.sessions.login(login_request("portico-web")).await.unwrap();

        let other = SessionManager::new(h.shared.clone(), CredentialCodec::new(TokenConfig::new("other")));
        assert!(matches!(
            other.authenticate(&outcome.access_token).await,
            Err(AuthError::InvalidToken)
        ));
        assert!(matches!(h.sessions.authenticate("garbage").await, Err(AuthError::InvalidToken)));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // System switch
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn switch_into_dsl_returns_scoped_token_permissions_and_menus() {
        let h = setup().await;
        let outcome = h.sessions.login(login_request("portico-web")).await.unwrap();
        let auth = h.sessions.authenticate(&outcome.access_token).await.unwrap();

        let switched = h.sessions.switch_system(&auth, "dsl", "10.0.0.2").await.unwrap();
        assert_eq!(switched.current_system.id, DSL_SYSTEM);
        assert_eq!(switched.current_role.as_ref().map(|r| r.code.as_str()), Some("dsl_admin"));
        assert_eq!(switched.expires_in, 8 * 3600);
        assert_eq!(switched.session.current_system_id, Some(DSL_SYSTEM));
        assert!(switched.session.last_system_switch.is_some());

        assert!(switched.permissions.iter().any(|p| p == "dsl.schema.execute"));
        assert!(switched.permissions.iter().all(|p| p.starts_with("dsl.")));
        assert_eq!(switched.permissions.len(), 9 * 5);

        let roots: Vec<_> = switched.menus.iter().map(|n| n.menu.code.as_str()).collect();
        assert_eq!(
            roots,
            ["dsl_dashboard", "data_modeling", "business_logic", "templates", "variables", "execution"]
        );
        let total: usize = switched.menus.iter().map(|n| n.node_count()).sum();
        assert_eq!(total, 13);

        let system_auth = h.sessions.authenticate(&switched.system_token).await.unwrap();
        assert_eq!(system_auth.scope(), SystemScope::System(DSL_SYSTEM));
        assert_eq!(system_auth.claims.system_code.as_deref(), Some("dsl"));
        assert_eq!(system_auth.claims.role_ids, Some(vec![DSL_ADMIN]));

        let history = h.sessions.switch_history(outcome.session.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].system_id, DSL_SYSTEM);
        assert_eq!(history[0].ip_address, "10.0.0.2");
    }

    #[tokio::test]
    async fn switch_without_assignment_writes_nothing() {
        let h = setup().await;
        let outcome = h.sessions.login(login_request("portico-web")).await.unwrap();
        let auth = h.sessions.authenticate(&outcome.access_token).await.unwrap();

        h.admin()
            .replace_user_roles(auth.user_id(), SystemScope::System(DSL_SYSTEM), &[], None)
            .await
            .unwrap();

        assert!(matches!(
            h.sessions.switch_system(&auth, "dsl", "").await,
            Err(AuthError::NoSystemAccess(code)) if code == "dsl"
        ));
        assert!(matches!(
            h.sessions.switch_system(&auth, "erp", "").await,
            Err(AuthError::SystemNotFound(_))
        ));

        assert!(h.sessions.switch_history(outcome.session.id).await.unwrap().is_empty());
        let session = h.store.find_session(outcome.session.id).await.unwrap().unwrap();
        assert!(session.current_system_id.is_none());
    }

    #[tokio::test]
    async fn previous_system_token_dies_after_switching_elsewhere() {
        let h = setup().await;
        let outcome = h.sessions.login(login_request("portico-web")).await.unwrap();
        let auth = h.sessions.authenticate(&outcome.access_token).await.unwrap();

        let dsl = h.sessions.switch_system(&auth, "dsl", "").await.unwrap();
        let admin = h.sessions.switch_system(&auth, "admin", "").await.unwrap();

        assert!(matches!(
            h.sessions.authenticate(&dsl.system_token).await,
            Err(AuthError::InvalidToken)
        ));
        let current = h.sessions.authenticate(&admin.system_token).await.unwrap();
        assert_eq!(current.scope(), SystemScope::System(ADMIN_SYSTEM));

        let history = h.sessions.switch_history(outcome.session.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].system_id, ADMIN_SYSTEM, "newest first");
    }

    #[tokio::test]
    async fn switching_to_the_same_system_again_appends_history() {
        let h = setup().await;
        let outcome = h.sessions.login(login_request("portico-web")).await.unwrap();
        let auth = h.sessions.authenticate(&outcome.access_token).await.unwrap();

        for expected in 1..=2 {
            h.sessions.switch_system(&auth, "dsl", "").await.unwrap();
            let history = h.sessions.switch_history(outcome.session.id).await.unwrap();
            assert_eq!(history.len(), expected);
            assert!(history.iter().all(|entry| entry.system_id == DSL_SYSTEM));

            let session = h.store.find_session(outcome.session.id).await.unwrap().unwrap();
            assert_eq!(session.current_system_id, Some(DSL_SYSTEM));
        }
    }

    #[tokio::test]
    async fn logout_during_switch_wins() {
        let h = setup().await;
        // Argon2 runs on the blocking pool, so log in before freezing the clock.
        let outcome = h.sessions.login(login_request("portico-web")).await.unwrap();
        let auth = h.sessions.authenticate(&outcome.access_token).await.unwrap();
        let session_id = outcome.session.id;

        tokio::time::pause();
        h.store.set_latency(Some(Duration::from_millis(100)));

        let sessions = h.sessions.clone();
        let switch = tokio::spawn(async move { sessions.switch_system(&auth, "dsl", "").await });

        // Lands after the switch has read the session, before it writes.
        tokio::time::sleep(Duration::from_millis(320)).await;
        h.sessions.logout(session_id, LogoutReason::User).await.unwrap();

        let result = switch.await.unwrap();
        assert!(matches!(result, Err(AuthError::SessionInvalid)));

        h.store.set_latency(None);
        let session = h.store.find_session(session_id).await.unwrap().unwrap();
        assert!(!session.is_active);
        assert!(session.current_system_id.is_none());
        assert!(h.store.switch_history(session_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn record_switch_refuses_a_terminated_session() {
        let h = setup().await;
        let outcome = h.sessions.login(login_request("portico-web")).await.unwrap();
        let session_id = outcome.session.id;

        assert!(h.store.terminate_session(session_id, LogoutReason::Admin, Utc::now()).await.unwrap());
        assert!(matches!(
            h.store.record_switch(session_id, DSL_SYSTEM, Utc::now(), "10.0.0.1").await,
            Err(StoreError::Precondition(_))
        ));

        // Past its expiry the row is refused as well.
        let fresh = h.sessions.login(login_request("portico-web")).await.unwrap();
        let later = fresh.session.expires_at + chrono::Duration::seconds(1);
        assert!(matches!(
            h.store.record_switch(fresh.session.id, DSL_SYSTEM, later, "10.0.0.1").await,
            Err(StoreError::Precondition(_))
        ));

        assert!(matches!(
            h.store.record_switch(SessionId::new(9_999), DSL_SYSTEM, Utc::now(), "10.0.0.1").await,
            Err(StoreError::NotFound(_))
        ));
        assert!(h.store.switch_history(session_id).await.unwrap().is_empty());
        assert!(h.store.switch_history(fresh.session.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn exit_system_returns_to_platform_scope() {
        let h = setup().await;
        let outcome = h.sessions.login(login_request("portico-web")).await.unwrap();
        let auth = h.sessions.authenticate(&outcome.access_token).await.unwrap();
        let switched = h.sessions.switch_system(&auth, "admin", "").await.unwrap();
        let system_auth = h.sessions.authenticate(&switched.system_token).await.unwrap();

        let grant = h.sessions.exit_system(&system_auth).await.unwrap();
        let platform = h.sessions.authenticate(&grant.access_token).await.unwrap();
        assert_eq!(platform.scope(), SystemScope::Platform);
        assert!(platform.session.current_system_id.is_none());

        assert!(matches!(
            h.sessions.authenticate(&switched.system_token).await,
            Err(AuthError::InvalidToken)
        ));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Termination
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn logout_is_idempotent_and_kills_every_token() {
        let h = setup().await;
        let outcome = h.sessions.login(login_request("portico-web")).await.unwrap();

        h.sessions.logout(outcome.session.id, LogoutReason::User).await.unwrap();
        h.sessions.logout(outcome.session.id, LogoutReason::Admin).await.unwrap();

        let session = h.store.find_session(outcome.session.id).await.unwrap().unwrap();
        assert!(!session.is_active);
        assert_eq!(session.logout_reason, Some(LogoutReason::User), "first reason wins");
        assert!(matches!(
            h.sessions.authenticate(&outcome.access_token).await,
            Err(AuthError::SessionInvalid)
        ));
        assert!(!h.sessions.is_session_valid(outcome.session.id).await.unwrap());
    }

    #[tokio::test]
    async fn remote_logout_can_target_one_device() {
        let h = setup().await;
        h.devices().register(device("phone-1")).await.unwrap();

        let web = h.sessions.login(login_request("portico-web")).await.unwrap();
        let phone = h.sessions.login(login_request("phone-1")).await.unwrap();
        let user = web.user.id;

        let count = h
            .sessions
            .remote_logout(user, Some(phone.session.device_id), LogoutReason::Admin)
            .await
            .unwrap();
        assert_eq!(count, 1);
        assert!(h.sessions.authenticate(&web.access_token).await.is_ok());
        assert!(h.sessions.authenticate(&phone.access_token).await.is_err());

        let count = h.sessions.remote_logout(user, None, LogoutReason::Admin).await.unwrap();
        assert_eq!(count, 1);
        assert!(h.sessions.sessions_for_user(user).await.unwrap().iter().all(|s| !s.is_active));
    }

    #[tokio::test]
    async fn deactivating_a_device_terminates_its_sessions() {
        let h = setup().await;
        let outcome = h.sessions.login(login_request("portico-web")).await.unwrap();

        let count = h.sessions.deactivate_device(outcome.session.device_id).await.unwrap();
        assert_eq!(count, 1);

        let session = h.store.find_session(outcome.session.id).await.unwrap().unwrap();
        assert_eq!(session.logout_reason, Some(LogoutReason::DeviceDeactivated));
        assert!(matches!(
            h.sessions.login(login_request("portico-web")).await,
            Err(AuthError::DeviceNotActive)
        ));
    }

    #[tokio::test]
    async fn expired_session_is_rejected_before_and_after_the_sweep() {
        let h = setup().await;
        let outcome = h.sessions.login(login_request("portico-web")).await.unwrap();
        let user = outcome.user.clone();

        let past = Utc::now() - chrono::Duration::hours(2);
        let stale = h
            .store
            .create_session(NewSession {
                session_token: Uuid::new_v4().to_string(),
                user_id: user.id,
                device_id: outcome.session.device_id,
                organization_id: None,
                ip_address: String::new(),
                user_agent: String::new(),
                created_at: past,
                expires_at: past + chrono::Duration::hours(1),
            })
            .await
            .unwrap();
        // Token is still within its own window; only the row has expired.
        let token = h
            .sessions
            .codec()
            .mint(TokenKind::Platform, &user, &stale, None, Utc::now())
            .unwrap();

        assert!(matches!(
            h.sessions.authenticate(&token.token).await,
            Err(AuthError::SessionExpired)
        ));

        assert_eq!(h.sessions.sweep_expired().await.unwrap(), 1);
        assert_eq!(h.sessions.sweep_expired().await.unwrap(), 0);

        let swept = h.store.find_session(stale.id).await.unwrap().unwrap();
        assert_eq!(swept.logout_reason, Some(LogoutReason::Expired));
        assert!(h.sessions.authenticate(&outcome.access_token).await.is_ok());

        let active = h.sessions.active_sessions(Default::default()).await.unwrap();
        assert_eq!(active.total, 1);
        assert_eq!(active.items[0].id, outcome.session.id);
    }

    #[tokio::test]
    async fn sweeper_worker_collects_expired_sessions() {
        let h = setup().await;
        let outcome = h.sessions.login(login_request("portico-web")).await.unwrap();
        let past = Utc::now() - chrono::Duration::minutes(5);
        let stale = h
            .store
            .create_session(NewSession {
                session_token: Uuid::new_v4().to_string(),
                user_id: outcome.user.id,
                device_id: outcome.session.device_id,
                organization_id: None,
                ip_address: String::new(),
                user_agent: String::new(),
                created_at: past,
                expires_at: past + chrono::Duration::minutes(1),
            })
            .await
            .unwrap();

        let worker = SessionSweeper::spawn(h.sessions.clone(), Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(100)).await;
        worker.shutdown().await;

        let swept = h.store.find_session(stale.id).await.unwrap().unwrap();
        assert!(!swept.is_active);
        assert!(h.sessions.is_session_valid(outcome.session.id).await.unwrap());
    }

    #[tokio::test]
    async fn touch_stamps_activity() {
        let h = setup().await;
        let outcome = h.sessions.login(login_request("portico-web")).await.unwrap();
        let before = outcome.session.last_activity;

        tokio::time::sleep(Duration::from_millis(5)).await;
        h.sessions.touch(outcome.session.id).await.unwrap();

        let after = h.store.find_session(outcome.session.id).await.unwrap().unwrap();
        assert!(after.last_activity > before);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Permissions
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn system_grants_never_leak_into_other_scopes() {
        let h = setup().await;
        let user = create_user(&h.store, "viewer@gerege.mn").await;
        h.admin()
            .replace_user_roles(user, SystemScope::System(DSL_SYSTEM), &[DSL_VIEWER], None)
            .await
            .unwrap();
        let resolver = h.sessions.resolver();

        let in_dsl = resolver.resolve(user, SystemScope::System(DSL_SYSTEM)).await.unwrap();
        assert_eq!(in_dsl.len(), 9);
        assert!(in_dsl.iter().all(|c| c.starts_with("dsl.") && c.ends_with(".view")));

        assert!(resolver.resolve(user, SystemScope::System(ADMIN_SYSTEM)).await.unwrap().is_empty());
        assert!(resolver.resolve(user, SystemScope::Platform).await.unwrap().is_empty());

        assert!(resolver.check(user, SystemScope::System(DSL_SYSTEM), "dsl.rule.view").await.unwrap());
        assert!(!resolver.check(user, SystemScope::System(DSL_SYSTEM), "dsl.rule.update").await.unwrap());
        assert!(matches!(
            resolver
                .authorize(user, SystemScope::System(DSL_SYSTEM), &Requirement::one("dsl.rule.update"))
                .await,
            Err(AuthError::Forbidden(code)) if code == "dsl.rule.update"
        ));
    }

    #[tokio::test]
    async fn combined_requirements_check_every_code() {
        let h = setup().await;
        let user = create_user(&h.store, "analyst@gerege.mn").await;
        h.admin()
            .replace_user_roles(user, SystemScope::System(DSL_SYSTEM), &[DSL_VIEWER], None)
            .await
            .unwrap();
        let resolver = h.sessions.resolver();
        let scope = SystemScope::System(DSL_SYSTEM);

        resolver
            .authorize(user, scope, &Requirement::any_of(["dsl.rule.update", "dsl.rule.view"]))
            .await
            .unwrap();
        assert!(matches!(
            resolver
                .authorize(user, scope, &Requirement::any_of(["dsl.rule.update", "dsl.rule.delete"]))
                .await,
            Err(AuthError::Forbidden(missing)) if missing == "dsl.rule.update|dsl.rule.delete"
        ));

        resolver
            .authorize(user, scope, &Requirement::all_of(["dsl.rule.view", "dsl.schema.view"]))
            .await
            .unwrap();
        assert!(matches!(
            resolver
                .authorize(user, scope, &Requirement::all_of(["dsl.rule.view", "dsl.rule.update"]))
                .await,
            Err(AuthError::Forbidden(missing)) if missing == "dsl.rule.update"
        ));
    }

    #[tokio::test]
    async fn platform_role_applies_inside_every_system() {
        let h = setup().await;
        let user = create_user(&h.store, "support@gerege.mn").await;

        h.store
            .insert_module(&Module {
                id: ModuleId::new(100),
                code: "profile".to_string(),
                name: "Profile".to_string(),
                system_id: None,
                is_active: true,
            })
            .await
            .unwrap();
        let permission = h
            .store
            .create_permission(NewPermission {
                code: "profile.view".to_string(),
                name: "Profile - View".to_string(),
                description: String::new(),
                system_id: None,
                module_id: ModuleId::new(100),
                action_id: Some(ActionId::new(1)),
            })
            .await
            .unwrap();
        h.store
            .insert_role(&Role {
                id: RoleId::new(100),
                code: "support".to_string(),
                name: "Support".to_string(),
                description: String::new(),
                system_id: None,
                is_system: false,
                is_active: true,
            })
            .await
            .unwrap();
        h.admin()
            .replace_role_permissions(RoleId::new(100), &[permission.id])
            .await
            .unwrap();
        h.admin()
            .replace_user_roles(user, SystemScope::Platform, &[RoleId::new(100)], None)
            .await
            .unwrap();
        h.admin()
            .replace_user_roles(user, SystemScope::System(DSL_SYSTEM), &[DSL_VIEWER], None)
            .await
            .unwrap();

        let resolver = h.sessions.resolver();
        let platform = resolver.resolve(user, SystemScope::Platform).await.unwrap();
        assert_eq!(platform.into_iter().collect::<Vec<_>>(), ["profile.view"]);

        let dsl = resolver.resolve(user, SystemScope::System(DSL_SYSTEM)).await.unwrap();
        assert!(dsl.contains("profile.view"));
        assert!(dsl.contains("dsl.schema.view"));

        let admin = resolver.resolve(user, SystemScope::System(ADMIN_SYSTEM)).await.unwrap();
        assert_eq!(admin.into_iter().collect::<Vec<_>>(), ["profile.view"]);
    }

    #[tokio::test]
    async fn regrants_are_visible_to_the_next_check() {
        let h = setup().await;
        let admin_user = h.store.find_user_by_email("admin@gerege.mn").await.unwrap().unwrap().id;
        let scope = SystemScope::System(DSL_SYSTEM);
        let resolver = h.sessions.resolver();

        assert!(resolver.check(admin_user, scope, "dsl.log.delete").await.unwrap());
        h.admin().replace_role_permissions(DSL_ADMIN, &[]).await.unwrap();
        assert!(!resolver.check(admin_user, scope, "dsl.log.delete").await.unwrap());
        assert!(resolver.resolve(admin_user, scope).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn store_failure_is_reported_not_denied() {
        let h = setup().await;
        let user = h.store.find_user_by_email("admin@gerege.mn").await.unwrap().unwrap().id;
        let scope = SystemScope::System(ADMIN_SYSTEM);

        h.store.set_failure(Some(StoreError::Unavailable("connection reset".into())));

        assert!(matches!(
            h.sessions.resolver().resolve(user, scope).await,
            Err(AuthError::PermissionCheckFailed(_))
        ));
        assert!(matches!(
            h.sessions
                .resolver()
                .authorize(user, scope, &Requirement::one("admin.user.view"))
                .await,
            Err(AuthError::PermissionCheckFailed(StoreError::Unavailable(_)))
        ));

        h.store.set_failure(None);
        assert!(h.sessions.resolver().check(user, scope, "admin.user.view").await.unwrap());
    }

    #[tokio::test]
    async fn slow_store_hits_the_call_deadline() {
        let h = setup_with_timeout(Duration::from_millis(20)).await;
        let user = h.store.find_user_by_email("admin@gerege.mn").await.unwrap().unwrap().id;

        h.store.set_latency(Some(Duration::from_millis(200)));
        let err = h
            .sessions
            .resolver()
            .resolve(user, SystemScope::System(ADMIN_SYSTEM))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::PermissionCheckFailed(StoreError::Timeout(_))));
    }

    #[tokio::test]
    async fn sync_creates_only_missing_codes() {
        let h = setup().await;
        let resolver = h.sessions.resolver();
        let scope = SystemScope::System(DSL_SYSTEM);

        assert!(resolver.sync_permissions(scope).await.unwrap().is_empty());

        h.store
            .insert_module(&Module {
                id: ModuleId::new(50),
                code: "report".to_string(),
                name: "Reports".to_string(),
                system_id: Some(DSL_SYSTEM),
                is_active: true,
            })
            .await
            .unwrap();
        for action in [1, 5] {
            h.store.link_module_action(ModuleId::new(50), ActionId::new(action)).await.unwrap();
        }

        let created = resolver.sync_permissions(scope).await.unwrap();
        assert_eq!(created, ["dsl.report.view", "dsl.report.export"]);
        let permission = h.store.find_permission_by_code("dsl.report.export").await.unwrap().unwrap();
        assert_eq!(permission.name, "dsl - Reports - Export");
        assert!(resolver.sync_permissions(scope).await.unwrap().is_empty());
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Menus
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn user_menu_tree_follows_role_grants() {
        let h = setup().await;
        let user = create_user(&h.store, "menus@gerege.mn").await;
        let menus = h.sessions.menus();

        assert!(menus.user_tree(user, DSL_SYSTEM).await.unwrap().is_empty());

        h.admin()
            .replace_user_roles(user, SystemScope::System(DSL_SYSTEM), &[DSL_VIEWER], None)
            .await
            .unwrap();
        // Only the dashboard and one leaf whose parent is not granted.
        h.admin()
            .replace_role_menus(DSL_VIEWER, &[portico_core::MenuId::new(21), portico_core::MenuId::new(23)])
            .await
            .unwrap();

        let tree = menus.user_tree(user, DSL_SYSTEM).await.unwrap();
        let codes: Vec<_> = tree.iter().map(|n| n.menu.code.as_str()).collect();
        assert_eq!(codes, ["dsl_dashboard", "schemas"]);
        assert!(menus.user_tree(user, ADMIN_SYSTEM).await.unwrap().is_empty());

        let full = menus.system_tree(ADMIN_SYSTEM).await.unwrap();
        assert_eq!(full.iter().map(|n| n.node_count()).sum::<usize>(), 19);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Administration
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn hidden_menus_are_left_out_of_user_tree() {
        let h = setup().await;
        let user = create_user(&h.store, "hidden@gerege.mn").await;
        h.store
            .insert_menu(&Menu {
                id: MenuId::new(90),
                code: "dsl_debug".to_string(),
                name: "Debug".to_string(),
                system_id: Some(DSL_SYSTEM),
                parent_id: None,
                path: "/dsl/debug".to_string(),
                icon: String::new(),
                sequence: 0,
                is_visible: false,
                is_active: true,
            })
            .await
            .unwrap();
        h.admin()
            .replace_user_roles(user, SystemScope::System(DSL_SYSTEM), &[DSL_VIEWER], None)
            .await
            .unwrap();
        h.admin()
            .replace_role_menus(DSL_VIEWER, &[MenuId::new(21), MenuId::new(90)])
            .await
            .unwrap();

        let menus = h.sessions.menus();
        let tree = menus.user_tree(user, DSL_SYSTEM).await.unwrap();
        let codes: Vec<_> = tree.iter().map(|n| n.menu.code.as_str()).collect();
        assert_eq!(codes, ["dsl_dashboard"]);

        let full = menus.system_tree(DSL_SYSTEM).await.unwrap();
        assert!(full.iter().any(|n| n.menu.code == "dsl_debug"));
    }

    #[tokio::test]
    async fn built_in_roles_cannot_be_deleted() {
        let h = setup().await;
        assert!(matches!(
            h.admin().delete_role(SUPER_ADMIN).await,
            Err(AuthError::ProtectedRole(code)) if code == "super_admin"
        ));

        h.store
            .insert_role(&Role {
                id: RoleId::new(77),
                code: "auditor".to_string(),
                name: "Auditor".to_string(),
                description: String::new(),
                system_id: Some(ADMIN_SYSTEM),
                is_system: false,
                is_active: true,
            })
            .await
            .unwrap();
        h.admin().delete_role(RoleId::new(77)).await.unwrap();
        assert!(h.store.find_role_by_id(RoleId::new(77)).await.unwrap().is_none());
        assert!(matches!(
            h.admin().delete_role(RoleId::new(77)).await,
            Err(AuthError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn user_roles_must_match_the_target_scope() {
        let h = setup().await;
        let user = create_user(&h.store, "mixed@gerege.mn").await;

        assert!(matches!(
            h.admin()
                .replace_user_roles(user, SystemScope::System(ADMIN_SYSTEM), &[DSL_VIEWER], None)
                .await,
            Err(AuthError::InvalidInput(_))
        ));
        assert!(matches!(
            h.admin()
                .replace_user_roles(UserId::new(9_999), SystemScope::System(DSL_SYSTEM), &[DSL_VIEWER], None)
                .await,
            Err(AuthError::NotFound(_))
        ));
        assert!(matches!(
            h.admin()
                .replace_user_roles(user, SystemScope::System(DSL_SYSTEM), &[RoleId::new(9_999)], None)
                .await,
            Err(AuthError::NotFound(_))
        ));
        assert!(h.store.active_assignments(user).await.unwrap().is_empty());

        let assigned = h
            .admin()
            .replace_user_roles(user, SystemScope::System(DSL_SYSTEM), &[DSL_VIEWER, DSL_VIEWER], None)
            .await
            .unwrap();
        assert_eq!(assigned.len(), 1);
    }

    #[tokio::test]
    async fn reseeding_is_idempotent() {
        let h = setup().await;
        let report = seed::run(h.store.as_ref(), &SeedOptions::default()).await.unwrap();
        assert_eq!(report.permissions_created, 0);
        assert!(!report.admin_created);

        let admin_user = h.store.find_user_by_email("admin@gerege.mn").await.unwrap().unwrap().id;
        assert_eq!(h.store.active_assignments(admin_user).await.unwrap().len(), 2);
    }
}
