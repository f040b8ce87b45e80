#![cfg(feature = "inmem-store")]

use actix_web::{test, web, App};
use marquee::auth::{create_jwt, Role};
use marquee::rate_limit::{InMemoryRateLimiter, RateLimitConfig, RateLimiterFacade};
use marquee::repo::inmem::InMemRepo;
use marquee::{config, AppState};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

fn ensure_secret() {
    std::env::set_var("JWT_SECRET", "test-secret-must-be-32-bytes-long!!");
}

fn bearer(id: i64, name: &str, roles: Vec<Role>) -> (&'static str, String) {
    ("Authorization", format!("Bearer {}", create_jwt(id, name, roles).unwrap()))
}

fn tight_limits() -> RateLimiterFacade {
    // one action per long window so the second is denied immediately
    let cfg = RateLimitConfig {
        comment_limit: 1,
        comment_window: Duration::from_secs(300),
        rating_limit: 1,
        rating_window: Duration::from_secs(300),
    };
    RateLimiterFacade::new(InMemoryRateLimiter::new(true), cfg)
}

#[actix_web::test]
#[serial_test::serial]
async fn second_comment_in_window_is_throttled() {
    ensure_secret();
    let state = AppState::new(Arc::new(InMemRepo::ephemeral())).with_rate_limiter(tight_limits());
    let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(config)).await;

    let admin = bearer(1, "admin", vec![Role::Admin]);
    let mut ids = Vec::new();
    for title in ["First", "Second"] {
        let req = test::TestRequest::post()
            .uri("/api/v1/movies")
            .insert_header(admin.clone())
            .set_json(json!({"title": title, "year_of_production": "2000-01-01"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 201);
        let v: Value = test::read_body_json(resp).await;
        ids.push(v["id"].as_i64().unwrap());
    }

    let user = bearer(5, "chatty", vec![Role::User]);
    let req = test::TestRequest::post()
        .uri("/api/v1/comment")
        .insert_header(user.clone())
        .set_json(json!({"movie": ids[0], "content": "first"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 201, "first comment allowed");

    let req = test::TestRequest::post()
        .uri("/api/v1/comment")
        .insert_header(user.clone())
        .set_json(json!({"movie": ids[1], "content": "second"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 429, "second comment should be rate limited");
    let retry: u64 = resp.headers().get("retry-after").unwrap().to_str().unwrap().parse().unwrap();
    assert!((1..=300).contains(&retry));

    // ratings have their own budget
    let req = test::TestRequest::post()
        .uri("/api/v1/rate")
        .insert_header(user.clone())
        .set_json(json!({"movie": ids[0], "rating": 7}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 201);
    let req = test::TestRequest::post()
        .uri("/api/v1/rate")
        .insert_header(user)
        .set_json(json!({"movie": ids[1], "rating": 7}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 429);

    // another user is unaffected
    let req = test::TestRequest::post()
        .uri("/api/v1/comment")
        .insert_header(bearer(6, "quiet", vec![Role::User]))
        .set_json(json!({"movie": ids[1], "content": "hello"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 201);
}

#[actix_web::test]
#[serial_test::serial]
async fn rejected_input_does_not_spend_budget() {
    ensure_secret();
    let state = AppState::new(Arc::new(InMemRepo::ephemeral())).with_rate_limiter(tight_limits());
    let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(config)).await;

    let req = test::TestRequest::post()
        .uri("/api/v1/movies")
        .insert_header(bearer(1, "admin", vec![Role::Admin]))
        .set_json(json!({"title": "Only", "year_of_production": "2000-01-01"}))
        .to_request();
    let v: Value = test::read_body_json(test::call_service(&app, req).await).await;
    let movie = v["id"].as_i64().unwrap();

    let user = bearer(9, "clumsy", vec![Role::User]);
    let req = test::TestRequest::post()
        .uri("/api/v1/rate")
        .insert_header(user.clone())
        .set_json(json!({"movie": movie, "rating": 0}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);
    let req = test::TestRequest::post()
        .uri("/api/v1/rate")
        .insert_header(user)
        .set_json(json!({"movie": movie, "rating": 4}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 201);
}
