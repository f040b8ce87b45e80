use actix_web::{dev::Payload, test, FromRequest};
use marquee::{
    auth::{create_jwt, Auth, Claims, Role},
    error::ApiError,
    require_role,
};
use serial_test::serial;
use std::env;

// Helper that guarantees a sufficiently long secret for tests.
fn set_secret() {
    env::set_var("JWT_SECRET", "test-secret-must-be-32-bytes-long!!");
}

fn auth_with(roles: Vec<Role>) -> Auth {
    Auth(Claims { sub: 1, name: "someone".into(), exp: usize::MAX, roles })
}

#[actix_web::test]
#[serial]
async fn jwt_roundtrip_ok() {
    set_secret();
    let token = create_jwt(42, "tester", vec![Role::User]).expect("token");
    // The Auth extractor is the public way to validate, so use it here.
    let req = test::TestRequest::default()
        .insert_header(("Authorization", format!("Bearer {}", token)))
        .to_http_request();
    let mut pl = Payload::None;
    let auth = Auth::from_request(&req, &mut pl).await.expect("extract");
    assert_eq!(auth.user_id(), 42);
    assert_eq!(auth.username(), "tester");
    assert!(auth.has_role(Role::User));
    assert!(!auth.is_staff());
}

#[actix_web::test]
#[serial]
async fn extractor_rejects_invalid_token() {
    set_secret();
    let req = test::TestRequest::default()
        .insert_header(("Authorization", "Bearer notatoken"))
        .to_http_request();
    let mut pl = Payload::None;
    let err = Auth::from_request(&req, &mut pl).await.err().expect("rejected");
    assert!(matches!(err, ApiError::Unauthorized));
}

#[actix_web::test]
#[serial]
async fn extractor_requires_header() {
    set_secret();
    let req = test::TestRequest::default().to_http_request();
    let mut pl = Payload::None;
    assert!(matches!(Auth::from_request(&req, &mut pl).await, Err(ApiError::Unauthorized)));
}

#[actix_web::test]
#[serial]
async fn token_signed_with_other_secret_is_rejected() {
    env::set_var("JWT_SECRET", "another-secret-that-is-long-enough!!");
    let token = create_jwt(7, "mallory", vec![Role::Admin]).unwrap();
    set_secret();
    let req = test::TestRequest::default()
        .insert_header(("Authorization", format!("Bearer {token}")))
        .to_http_request();
    let mut pl = Payload::None;
    assert!(Auth::from_request(&req, &mut pl).await.is_err());
}

#[::core::prelude::v1::test]
#[serial]
fn short_secret_cannot_sign() {
    env::set_var("JWT_SECRET", "too-short");
    assert!(create_jwt(1, "a", vec![Role::User]).is_err());
    set_secret();
}

#[::core::prelude::v1::test]
fn require_role_macro_enforces_roles() {
    fn guarded(a: Auth) -> Result<(), ApiError> {
        require_role!(a, Role::Moderator);
        Ok(())
    }
    assert!(guarded(auth_with(vec![Role::Moderator])).is_ok());
    // admins pass every guard
    assert!(guarded(auth_with(vec![Role::Admin])).is_ok());
    assert!(matches!(guarded(auth_with(vec![Role::User])), Err(ApiError::Forbidden)));
}

#[::core::prelude::v1::test]
fn staff_means_moderator_or_admin() {
    assert!(auth_with(vec![Role::Moderator]).is_staff());
    assert!(auth_with(vec![Role::User, Role::Admin]).is_staff());
    assert!(!auth_with(vec![Role::User]).is_staff());
}
