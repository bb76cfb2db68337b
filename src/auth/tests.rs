use super::*;
use crate::auth::models::{AndroidSettings, IosSettings};
use crate::auth::provider_config::{
    CreateOidcProviderConfigRequest, CreateSamlProviderConfigRequest, SamlCertificate,
    SamlIdpConfig, SamlSpConfig, UpdateOidcProviderConfigRequest, UpdateSamlProviderConfigRequest,
};
use crate::auth::tenant_mgt::{ListTenantsOptions, TenantManager, UpdateTenantRequest};
use futures::TryStreamExt;
use httpmock::prelude::*;
use reqwest::Client;
use reqwest_middleware::ClientBuilder;
use serde_json::json;

fn auth(server: &MockServer) -> FirebaseAuth {
    let client = ClientBuilder::new(Client::new()).build();
    FirebaseAuth::new_with_client(client, server.url("/v1/projects/test-project"))
}

#[tokio::test]
async fn test_generate_password_reset_link() {
    let server = MockServer::start();
    let auth = auth(&server);

    let email = "test@example.com";
    let settings = ActionCodeSettings {
        url: "https://www.example.com/finishSignUp".to_string(),
        handle_code_in_app: Some(true),
        ios: Some(IosSettings {
            bundle_id: "com.example.ios".to_string(),
        }),
        android: Some(AndroidSettings {
            package_name: "com.example.android".to_string(),
            install_app: Some(true),
            minimum_version: Some("12".to_string()),
        }),
        dynamic_link_domain: Some("example.page.link".to_string()),
    };

    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/v1/projects/test-project/accounts:sendOobCode")
            .header("content-type", "application/json")
            .json_body(json!({
                "requestType": "PASSWORD_RESET",
                "email": email,
                "returnOobLink": true,
                "continueUrl": "https://www.example.com/finishSignUp",
                "canHandleCodeInApp": true,
                "dynamicLinkDomain": "example.page.link",
                "iOSBundleId": "com.example.ios",
                "androidPackageName": "com.example.android",
                "androidInstallApp": true,
                "androidMinimumVersion": "12"
            }));
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!({
                "email": email,
                "oobLink": "https://example.com/action?mode=resetPassword&oobCode=code"
            }));
    });

    let link = auth
        .generate_password_reset_link(email, Some(settings))
        .await
        .unwrap();
    assert_eq!(link, "https://example.com/action?mode=resetPassword&oobCode=code");

    mock.assert();
}

#[tokio::test]
async fn test_generate_email_verification_link() {
    let server = MockServer::start();
    let auth = auth(&server);

    let email = "test@example.com";
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/v1/projects/test-project/accounts:sendOobCode")
            .json_body(json!({
                "requestType": "VERIFY_EMAIL",
                "email": email,
                "returnOobLink": true
            }));
        then.status(200)
            .json_body(json!({"oobLink": "https://example.com/action?mode=verifyEmail"}));
    });

    let link = auth
        .generate_email_verification_link(email, None)
        .await
        .unwrap();
    assert_eq!(link, "https://example.com/action?mode=verifyEmail");

    mock.assert();
}

#[tokio::test]
async fn test_email_link_rejects_malformed_email() {
    let server = MockServer::start();
    let auth = auth(&server);

    let err = auth
        .generate_sign_in_with_email_link(
            "not-an-email",
            ActionCodeSettings {
                url: "https://example.com".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}

#[tokio::test]
async fn test_create_user_fetches_the_created_record() {
    let server = MockServer::start();
    let auth = auth(&server);

    let create_mock = server.mock(|when, then| {
        when.method(POST)
            .path("/v1/projects/test-project/accounts")
            .json_body(json!({
                "email": "test@example.com",
                "password": "password123"
            }));
        then.status(200).json_body(json!({"localId": "new-uid"}));
    });
    let lookup_mock = server.mock(|when, then| {
        when.method(POST)
            .path("/v1/projects/test-project/accounts:lookup")
            .json_body(json!({"localId": ["new-uid"]}));
        then.status(200).json_body(json!({
            "users": [{
                "localId": "new-uid",
                "email": "test@example.com",
                "emailVerified": false,
                "createdAt": "1700000000000"
            }]
        }));
    });

    let user = auth
        .create_user(CreateUserRequest {
            email: Some("test@example.com".to_string()),
            password: Some("password123".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(user.local_id, "new-uid");
    assert_eq!(user.email.as_deref(), Some("test@example.com"));
    assert_eq!(
        user.metadata.creation_time().map(|t| t.timestamp()),
        Some(1_700_000_000)
    );
    create_mock.assert();
    lookup_mock.assert();
}

#[tokio::test]
async fn test_create_user_validates_before_sending() {
    let server = MockServer::start();
    let auth = auth(&server);
    let mock = server.mock(|when, then| {
        when.method(POST).path("/v1/projects/test-project/accounts");
        then.status(200).json_body(json!({"localId": "x"}));
    });

    let err = auth
        .create_user(CreateUserRequest {
            password: Some("short".to_string()),
            ..Default::default()
        })
        .await
        .unwrap_err();

    assert!(matches!(err, Error::InvalidArgument(_)));
    mock.assert_calls(0);
}

#[tokio::test]
async fn test_create_user_duplicate_email_is_classified() {
    let server = MockServer::start();
    let auth = auth(&server);

    server.mock(|when, then| {
        when.method(POST).path("/v1/projects/test-project/accounts");
        then.status(400).json_body(json!({
            "error": {
                "code": 400,
                "message": "EMAIL_EXISTS : The email address is already in use.",
                "status": "INVALID_ARGUMENT"
            }
        }));
    });

    let err = auth
        .create_user(CreateUserRequest {
            email: Some("taken@example.com".to_string()),
            ..Default::default()
        })
        .await
        .unwrap_err();

    let err = err.as_service_error().unwrap();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    assert_eq!(err.auth_error_code(), Some(AuthErrorCode::EmailAlreadyExists));
    assert_eq!(
        err.message(),
        "The user with the provided email already exists (EMAIL_EXISTS): The email address is already in use."
    );
    assert_eq!(err.http_response().unwrap().status, 400);
}

#[tokio::test]
async fn test_unknown_auth_code_keeps_backend_message() {
    let server = MockServer::start();
    let auth = auth(&server);

    server.mock(|when, then| {
        when.method(POST).path("/v1/projects/test-project/accounts:delete");
        then.status(400).json_body(json!({
            "error": {"code": 400, "message": "SOMETHING_NEW", "status": "FAILED_PRECONDITION"}
        }));
    });

    let err = auth.delete_user("uid1").await.unwrap_err();
    let err = err.as_service_error().unwrap();
    assert_eq!(err.kind(), ErrorKind::FailedPrecondition);
    assert_eq!(err.auth_error_code(), None);
    assert_eq!(err.message(), "SOMETHING_NEW");
}

#[tokio::test]
async fn test_update_user() {
    let server = MockServer::start();
    let auth = auth(&server);

    let update_mock = server.mock(|when, then| {
        when.method(POST)
            .path("/v1/projects/test-project/accounts:update")
            .json_body(json!({
                "localId": "uid1",
                "displayName": "New Name",
                "disabled": true
            }));
        then.status(200).json_body(json!({"localId": "uid1"}));
    });
    let lookup_mock = server.mock(|when, then| {
        when.method(POST).path("/v1/projects/test-project/accounts:lookup");
        then.status(200).json_body(json!({
            "users": [{"localId": "uid1", "displayName": "New Name", "disabled": true}]
        }));
    });

    let user = auth
        .update_user(UpdateUserRequest {
            local_id: "uid1".to_string(),
            display_name: Some("New Name".to_string()),
            disabled: Some(true),
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(user.display_name.as_deref(), Some("New Name"));
    assert!(user.disabled);
    update_mock.assert();
    lookup_mock.assert();
}

#[tokio::test]
async fn test_delete_user() {
    let server = MockServer::start();
    let auth = auth(&server);

    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/v1/projects/test-project/accounts:delete")
            .json_body(json!({"localId": "uid1"}));
        then.status(200).json_body(json!({}));
    });

    auth.delete_user("uid1").await.unwrap();
    mock.assert();
}

#[tokio::test]
async fn test_get_user_by_email() {
    let server = MockServer::start();
    let auth = auth(&server);

    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/v1/projects/test-project/accounts:lookup")
            .json_body(json!({"email": ["test@example.com"]}));
        then.status(200).json_body(json!({
            "users": [{"localId": "uid1", "email": "test@example.com"}]
        }));
    });

    let user = auth.get_user_by_email("test@example.com").await.unwrap();
    assert_eq!(user.local_id, "uid1");
    mock.assert();
}

#[tokio::test]
async fn test_get_user_not_found() {
    let server = MockServer::start();
    let auth = auth(&server);

    server.mock(|when, then| {
        when.method(POST).path("/v1/projects/test-project/accounts:lookup");
        then.status(200).json_body(json!({}));
    });

    let err = auth.get_user_by_phone_number("+15555550100").await.unwrap_err();
    let err = err.as_service_error().unwrap();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(err.auth_error_code(), Some(AuthErrorCode::UserNotFound));
    assert!(err.http_response().is_none());
}

#[tokio::test]
async fn test_set_custom_user_claims() {
    let server = MockServer::start();
    let auth = auth(&server);

    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/v1/projects/test-project/accounts:update")
            .json_body(json!({
                "localId": "uid1",
                "customAttributes": "{\"admin\":true}"
            }));
        then.status(200).json_body(json!({"localId": "uid1"}));
    });

    let claims = json!({"admin": true});
    auth.set_custom_user_claims("uid1", claims.as_object())
        .await
        .unwrap();
    mock.assert();
}

#[tokio::test]
async fn test_reserved_and_oversized_claims_are_rejected() {
    let server = MockServer::start();
    let auth = auth(&server);

    let reserved = json!({"sub": "someone-else"});
    let err = auth
        .set_custom_user_claims("uid1", reserved.as_object())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));

    let oversized = json!({"blob": "x".repeat(1000)});
    let err = auth
        .set_custom_user_claims("uid1", oversized.as_object())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}

#[tokio::test]
async fn test_revoke_refresh_tokens() {
    let server = MockServer::start();
    let auth = auth(&server);

    let mock = server.mock(|when, then| {
        when.method(POST).path("/v1/projects/test-project/accounts:update");
        then.status(200).json_body(json!({"localId": "uid1"}));
    });

    auth.revoke_refresh_tokens("uid1").await.unwrap();
    mock.assert();
}

#[tokio::test]
async fn test_list_users() {
    let server = MockServer::start();
    let auth = auth(&server);

    let mock = server.mock(|when, then| {
        when.method(GET)
            .path("/v1/projects/test-project/accounts:batchGet")
            .query_param("maxResults", "2");
        then.status(200).json_body(json!({
            "users": [{"localId": "a"}, {"localId": "b"}]
        }));
    });

    let users = auth
        .list_users(ListUsersOptions {
            page_size: Some(2),
            page_token: None,
        })
        .unwrap();
    let uids: Vec<String> = users
        .items()
        .map_ok(|user| user.local_id)
        .try_collect()
        .await
        .unwrap();

    assert_eq!(uids, vec!["a", "b"]);
    mock.assert();
}

#[tokio::test]
async fn test_list_users_resumes_from_page_token() {
    let server = MockServer::start();
    let auth = auth(&server);

    let mock = server.mock(|when, then| {
        when.method(GET)
            .path("/v1/projects/test-project/accounts:batchGet")
            .query_param("maxResults", "10")
            .query_param("nextPageToken", "resume-here");
        then.status(200)
            .json_body(json!({"users": [{"localId": "c"}], "nextPageToken": ""}));
    });

    let mut users = auth
        .list_users(ListUsersOptions {
            page_size: None,
            page_token: Some("resume-here".to_string()),
        })
        .unwrap();
    let page = users.read_page(10).await.unwrap();

    assert_eq!(page.items.len(), 1);
    assert_eq!(page.next_page_token, None);
    mock.assert();
}

#[test]
fn test_list_users_rejects_oversized_pages() {
    let server = MockServer::start();
    let err = auth(&server)
        .list_users(ListUsersOptions {
            page_size: Some(1001),
            page_token: None,
        })
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}

#[tokio::test]
async fn test_delete_users_reports_failures_by_index() {
    let server = MockServer::start();
    let auth = auth(&server);

    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/v1/projects/test-project/accounts:batchDelete")
            .json_body(json!({"localIds": ["a", "b", "c"], "force": true}));
        then.status(200).json_body(json!({
            "errors": [{
                "index": 1,
                "localId": "b",
                "message": "NOT_DISABLED : Disable the account before batch deletion."
            }]
        }));
    });

    let result = auth.delete_users(&["a", "b", "c"]).await.unwrap();

    assert_eq!(result.success_count, 2);
    assert_eq!(result.failure_count, 1);
    assert_eq!(result.errors[0].index, 1);
    assert_eq!(
        result.errors[0].reason,
        "NOT_DISABLED : Disable the account before batch deletion."
    );
    mock.assert();
}

#[tokio::test]
async fn test_delete_users_limits() {
    let server = MockServer::start();
    let auth = auth(&server);

    let empty = auth.delete_users(&[]).await.unwrap();
    assert_eq!(empty, BulkResult::default());

    let uids: Vec<String> = (0..1001).map(|i| format!("uid{}", i)).collect();
    let refs: Vec<&str> = uids.iter().map(String::as_str).collect();
    let err = auth.delete_users(&refs).await.unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}

#[tokio::test]
async fn test_import_users() {
    let server = MockServer::start();
    let auth = auth(&server);

    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/v1/projects/test-project/accounts:batchCreate")
            .json_body(json!({
                "users": [
                    {"localId": "u1", "passwordHash": "aGFzaA=="},
                    {"localId": "u2", "email": "u2@example.com"}
                ],
                "hashAlgorithm": "HMAC_SHA256",
                "signerKey": "c2VjcmV0"
            }));
        then.status(200).json_body(json!({
            "error": [{"index": 1, "message": "Invalid email"}]
        }));
    });

    let users = vec![
        UserImportRecord {
            local_id: "u1".to_string(),
            password_hash: Some("aGFzaA==".to_string()),
            ..Default::default()
        },
        UserImportRecord {
            local_id: "u2".to_string(),
            email: Some("u2@example.com".to_string()),
            ..Default::default()
        },
    ];
    let hash = UserImportHash {
        hash_algorithm: "HMAC_SHA256".to_string(),
        signer_key: Some("c2VjcmV0".to_string()),
        salt_separator: None,
        rounds: None,
        memory_cost: None,
    };

    let result = auth.import_users(&users, Some(&hash)).await.unwrap();
    assert_eq!(result.success_count, 1);
    assert_eq!(result.failure_count, 1);
    assert_eq!(result.errors[0].index, 1);
    assert_eq!(result.errors[0].reason, "Invalid email");
    mock.assert();
}

#[tokio::test]
async fn test_import_users_with_password_requires_hash() {
    let server = MockServer::start();
    let auth = auth(&server);

    let users = vec![UserImportRecord {
        local_id: "u1".to_string(),
        password_hash: Some("aGFzaA==".to_string()),
        ..Default::default()
    }];
    let err = auth.import_users(&users, None).await.unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}

#[tokio::test]
async fn test_tenant_scoped_auth_uses_tenant_path() {
    let server = MockServer::start();
    let client = ClientBuilder::new(Client::new()).build();
    let tenants = TenantManager::new_with_client(client, server.url("/v2/projects/test-project"));

    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/v2/projects/test-project/tenants/tenant-1/accounts:lookup");
        then.status(200)
            .json_body(json!({"users": [{"localId": "uid1", "tenantId": "tenant-1"}]}));
    });

    let tenant_auth = tenants.auth_for_tenant("tenant-1").unwrap();
    assert_eq!(tenant_auth.tenant_id(), Some("tenant-1"));
    let user = tenant_auth.get_user("uid1").await.unwrap();
    assert_eq!(user.tenant_id.as_deref(), Some("tenant-1"));
    mock.assert();

    assert!(tenants.auth_for_tenant("").is_err());
}

#[tokio::test]
async fn test_update_tenant_sends_update_mask() {
    let server = MockServer::start();
    let client = ClientBuilder::new(Client::new()).build();
    let tenants = TenantManager::new_with_client(client, server.url("/v2/projects/test-project"));

    let mock = server.mock(|when, then| {
        when.method(PATCH)
            .path("/v2/projects/test-project/tenants/tenant-1")
            .query_param("updateMask", "allowPasswordSignup,displayName")
            .json_body(json!({"displayName": "Renamed", "allowPasswordSignup": true}));
        then.status(200).json_body(json!({
            "name": "projects/test-project/tenants/tenant-1",
            "displayName": "Renamed",
            "allowPasswordSignup": true
        }));
    });

    let tenant = tenants
        .update_tenant(
            "tenant-1",
            UpdateTenantRequest {
                display_name: Some("Renamed".to_string()),
                allow_password_signup: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(tenant.tenant_id(), "tenant-1");
    assert!(tenant.allow_password_signup);
    mock.assert();

    let err = tenants
        .update_tenant("tenant-1", UpdateTenantRequest::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}

#[tokio::test]
async fn test_update_tenant_masks_test_phone_numbers_as_a_whole() {
    let server = MockServer::start();
    let client = ClientBuilder::new(Client::new()).build();
    let tenants = TenantManager::new_with_client(client, server.url("/v2/projects/test-project"));

    let mock = server.mock(|when, then| {
        when.method(PATCH)
            .path("/v2/projects/test-project/tenants/tenant-1")
            .query_param("updateMask", "testPhoneNumbers")
            .json_body(json!({"testPhoneNumbers": {"+15555550100": "123456"}}));
        then.status(200).json_body(json!({
            "name": "projects/test-project/tenants/tenant-1",
            "testPhoneNumbers": {"+15555550100": "123456"}
        }));
    });

    let numbers = std::collections::HashMap::from([(
        "+15555550100".to_string(),
        "123456".to_string(),
    )]);
    let tenant = tenants
        .update_tenant(
            "tenant-1",
            UpdateTenantRequest {
                test_phone_numbers: Some(numbers),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(
        tenant.test_phone_numbers.unwrap().get("+15555550100").map(String::as_str),
        Some("123456")
    );
    mock.assert();
}

#[tokio::test]
async fn test_list_tenants() {
    let server = MockServer::start();
    let client = ClientBuilder::new(Client::new()).build();
    let tenants = TenantManager::new_with_client(client, server.url("/v2/projects/test-project"));

    let mock = server.mock(|when, then| {
        when.method(GET)
            .path("/v2/projects/test-project/tenants")
            .query_param("pageSize", "100");
        then.status(200).json_body(json!({
            "tenants": [
                {"name": "projects/test-project/tenants/t1"},
                {"name": "projects/test-project/tenants/t2"}
            ]
        }));
    });

    let listed: Vec<_> = tenants
        .list_tenants(ListTenantsOptions::default())
        .unwrap()
        .items()
        .try_collect()
        .await
        .unwrap();

    assert_eq!(listed.len(), 2);
    assert_eq!(listed[1].tenant_id(), "t2");
    mock.assert();
}

#[tokio::test]
async fn test_tenant_not_found() {
    let server = MockServer::start();
    let client = ClientBuilder::new(Client::new()).build();
    let tenants = TenantManager::new_with_client(client, server.url("/v2/projects/test-project"));

    server.mock(|when, then| {
        when.method(GET).path("/v2/projects/test-project/tenants/missing");
        then.status(404).json_body(json!({
            "error": {"code": 404, "message": "TENANT_NOT_FOUND", "status": "NOT_FOUND"}
        }));
    });

    let err = tenants.get_tenant("missing").await.unwrap_err();
    let err = err.as_service_error().unwrap();
    assert_eq!(err.auth_error_code(), Some(AuthErrorCode::TenantNotFound));
    assert_eq!(
        err.message(),
        "No tenant found for the given identifier (TENANT_NOT_FOUND)"
    );
}

#[tokio::test]
async fn test_create_oidc_provider_config() {
    let server = MockServer::start();
    let client = ClientBuilder::new(Client::new()).build();
    let configs =
        ProviderConfigManager::new_with_client(client, server.url("/v2/projects/test-project"));

    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/v2/projects/test-project/oauthIdpConfigs")
            .query_param("oauthIdpConfigId", "oidc.test")
            .json_body(json!({
                "displayName": "Test OIDC",
                "enabled": true,
                "clientId": "client-id",
                "issuer": "https://issuer.com"
            }));
        then.status(200).json_body(json!({
            "name": "projects/test-project/oauthIdpConfigs/oidc.test",
            "displayName": "Test OIDC",
            "enabled": true,
            "clientId": "client-id",
            "issuer": "https://issuer.com"
        }));
    });

    let config = configs
        .create_oidc_provider_config(CreateOidcProviderConfigRequest {
            provider_id: "oidc.test".to_string(),
            display_name: Some("Test OIDC".to_string()),
            enabled: Some(true),
            client_id: "client-id".to_string(),
            issuer: "https://issuer.com".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(config.provider_id(), "oidc.test");
    assert!(config.enabled);
    mock.assert();
}

#[tokio::test]
async fn test_provider_id_prefix_is_enforced() {
    let server = MockServer::start();
    let client = ClientBuilder::new(Client::new()).build();
    let configs =
        ProviderConfigManager::new_with_client(client, server.url("/v2/projects/test-project"));

    let err = configs
        .get_oidc_provider_config("saml.wrong")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));

    let err = configs.delete_saml_provider_config("saml.").await.unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}

#[tokio::test]
async fn test_update_oidc_provider_config() {
    let server = MockServer::start();
    let client = ClientBuilder::new(Client::new()).build();
    let configs =
        ProviderConfigManager::new_with_client(client, server.url("/v2/projects/test-project"));

    let mock = server.mock(|when, then| {
        when.method(PATCH)
            .path("/v2/projects/test-project/oauthIdpConfigs/oidc.test")
            .query_param("updateMask", "clientSecret,enabled")
            .json_body(json!({"enabled": false, "clientSecret": "s3cret"}));
        then.status(200).json_body(json!({
            "name": "projects/test-project/oauthIdpConfigs/oidc.test",
            "enabled": false
        }));
    });

    let config = configs
        .update_oidc_provider_config(
            "oidc.test",
            UpdateOidcProviderConfigRequest {
                enabled: Some(false),
                client_secret: Some("s3cret".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert!(!config.enabled);
    mock.assert();
}

#[tokio::test]
async fn test_create_and_update_saml_provider_config() {
    let server = MockServer::start();
    let client = ClientBuilder::new(Client::new()).build();
    let configs =
        ProviderConfigManager::new_with_client(client, server.url("/v2/projects/test-project"));

    let create_mock = server.mock(|when, then| {
        when.method(POST)
            .path("/v2/projects/test-project/inboundSamlConfigs")
            .query_param("inboundSamlConfigId", "saml.test")
            .json_body(json!({
                "displayName": "Test SAML",
                "idpConfig": {
                    "idpEntityId": "idp-entity",
                    "ssoUrl": "https://sso.example.com",
                    "idpCertificates": [{"x509Certificate": "cert"}]
                },
                "spConfig": {
                    "spEntityId": "sp-entity",
                    "callbackUri": "https://callback.example.com"
                }
            }));
        then.status(200).json_body(json!({
            "name": "projects/test-project/inboundSamlConfigs/saml.test",
            "displayName": "Test SAML",
            "enabled": true
        }));
    });
    let update_mock = server.mock(|when, then| {
        when.method(PATCH)
            .path("/v2/projects/test-project/inboundSamlConfigs/saml.test")
            .query_param("updateMask", "idpConfig.ssoUrl")
            .json_body(json!({"idpConfig": {"ssoUrl": "https://new-sso.example.com"}}));
        then.status(200).json_body(json!({
            "name": "projects/test-project/inboundSamlConfigs/saml.test"
        }));
    });

    let created = configs
        .create_saml_provider_config(CreateSamlProviderConfigRequest {
            provider_id: "saml.test".to_string(),
            display_name: Some("Test SAML".to_string()),
            enabled: None,
            idp_config: SamlIdpConfig {
                idp_entity_id: Some("idp-entity".to_string()),
                sso_url: Some("https://sso.example.com".to_string()),
                idp_certificates: Some(vec![SamlCertificate {
                    x509_certificate: "cert".to_string(),
                }]),
            },
            sp_config: SamlSpConfig {
                sp_entity_id: Some("sp-entity".to_string()),
                callback_uri: Some("https://callback.example.com".to_string()),
            },
        })
        .await
        .unwrap();
    assert_eq!(created.provider_id(), "saml.test");

    configs
        .update_saml_provider_config(
            "saml.test",
            UpdateSamlProviderConfigRequest {
                idp_config: Some(SamlIdpConfig {
                    sso_url: Some("https://new-sso.example.com".to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    create_mock.assert();
    update_mock.assert();
}

#[tokio::test]
async fn test_configuration_not_found() {
    let server = MockServer::start();
    let client = ClientBuilder::new(Client::new()).build();
    let configs =
        ProviderConfigManager::new_with_client(client, server.url("/v2/projects/test-project"));

    server.mock(|when, then| {
        when.method(GET)
            .path("/v2/projects/test-project/inboundSamlConfigs/saml.missing");
        then.status(404).json_body(json!({
            "error": {"code": 404, "message": "CONFIGURATION_NOT_FOUND", "status": "NOT_FOUND"}
        }));
    });

    let err = configs
        .get_saml_provider_config("saml.missing")
        .await
        .unwrap_err();
    assert_eq!(
        err.as_service_error().unwrap().auth_error_code(),
        Some(AuthErrorCode::ConfigurationNotFound)
    );
    assert_eq!(err.kind(), Some(ErrorKind::NotFound));
}

#[tokio::test]
async fn test_cancelled_auth_handle_makes_no_calls() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST).path("/v1/projects/test-project/accounts:lookup");
        then.status(200).json_body(json!({}));
    });

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = auth(&server)
        .with_cancellation(cancel)
        .get_user("uid1")
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Cancelled));
    mock.assert_calls(0);
}
