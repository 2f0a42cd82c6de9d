use super::*;
use httpmock::prelude::*;
use reqwest::Client;
use reqwest_middleware::ClientBuilder;
use serde_json::json;

fn auth_for(server: &MockServer) -> FirebaseAuth {
    let client = ClientBuilder::new(Client::new()).build();
    FirebaseAuth::new_with_client(client, server.url("/v1/projects/test-project"))
}

#[tokio::test]
async fn test_delete_user() {
    let server = MockServer::start();
    let auth = auth_for(&server);

    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/v1/projects/test-project/accounts:delete")
            .header("content-type", "application/json")
            .json_body(json!({ "localId": "uid-123" }));
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!({ "kind": "identitytoolkit#DeleteAccountResponse" }));
    });

    auth.delete_user("uid-123").await.unwrap();

    mock.assert();
}

#[tokio::test]
async fn test_delete_user_not_found() {
    let server = MockServer::start();
    let auth = auth_for(&server);

    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/v1/projects/test-project/accounts:delete");
        then.status(400)
            .header("content-type", "application/json")
            .json_body(json!({
                "error": {
                    "code": 400,
                    "message": "USER_NOT_FOUND",
                    "status": "INVALID_ARGUMENT"
                }
            }));
    });

    let err = auth.delete_user("gone").await.unwrap_err();
    assert!(matches!(err, AuthError::UserNotFound));

    mock.assert();
}

#[tokio::test]
async fn test_delete_user_api_error() {
    let server = MockServer::start();
    let auth = auth_for(&server);

    let _mock = server.mock(|when, then| {
        when.method(POST)
            .path("/v1/projects/test-project/accounts:delete");
        then.status(403)
            .header("content-type", "application/json")
            .json_body(json!({
                "error": {
                    "code": 403,
                    "message": "PERMISSION_DENIED",
                    "status": "PERMISSION_DENIED"
                }
            }));
    });

    match auth.delete_user("uid-123").await {
        Err(AuthError::ApiError(message)) => {
            assert_eq!(message, "PERMISSION_DENIED (code: 403)");
        }
        other => panic!("unexpected result: {:?}", other),
    }
}
