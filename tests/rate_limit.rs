mod common;

use std::time::Duration;

use actix_web::http::{header, StatusCode};
use actix_web::{test, web, App};
use common::{TestEnv, ADMIN_USER};
use folio::config;
use folio::rate_limit::{InMemoryRateLimiter, RateLimitConfig, RateLimiterFacade};
use serde_json::{json, Value};

fn tight_limits() -> RateLimitConfig {
    RateLimitConfig {
        upload_limit: 100,
        upload_window: Duration::from_secs(3600),
        search_limit: 2,
        search_window: Duration::from_secs(60),
        login_limit: 1,
        login_window: Duration::from_secs(900),
    }
}

#[actix_web::test]
async fn third_search_is_limited_per_client() {
    let env = TestEnv::new().await;
    let mut state = env.state.clone();
    state.rate_limiter = Some(RateLimiterFacade::new(InMemoryRateLimiter::new(true), tight_limits()));
    let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(config)).await;

    let search = |ip: &str| {
        test::TestRequest::get()
            .uri("/api/presentations/search/rust")
            .peer_addr(format!("{ip}:4000").parse().unwrap())
            .to_request()
    };
    for _ in 0..2 {
        assert_eq!(test::call_service(&app, search("10.0.0.1")).await.status(), StatusCode::OK);
    }
    let resp = test::call_service(&app, search("10.0.0.1")).await;
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry: u64 = resp.headers().get(header::RETRY_AFTER).unwrap().to_str().unwrap().parse().unwrap();
    assert!((1..=60).contains(&retry));
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], false);

    // another client has its own budget
    assert_eq!(test::call_service(&app, search("10.0.0.2")).await.status(), StatusCode::OK);
}

#[actix_web::test]
async fn login_attempts_are_limited() {
    let env = TestEnv::new().await;
    let mut state = env.state.clone();
    state.rate_limiter = Some(RateLimiterFacade::new(InMemoryRateLimiter::new(true), tight_limits()));
    let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(config)).await;

    let attempt = || {
        test::TestRequest::post()
            .uri("/api/auth/login")
            .set_json(json!({"username": ADMIN_USER, "password": "guess"}))
            .to_request()
    };
    assert_eq!(test::call_service(&app, attempt()).await.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(test::call_service(&app, attempt()).await.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[actix_web::test]
async fn no_limiter_means_no_limits() {
    let env = TestEnv::new().await;
    let app = test::init_service(App::new().app_data(web::Data::new(env.state.clone())).configure(config)).await;
    for _ in 0..5 {
        let req = test::TestRequest::get().uri("/api/presentations/search/rust").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
    }
}

#[actix_web::test]
async fn forwarded_header_does_not_open_new_buckets() {
    let env = TestEnv::new().await;
    let mut state = env.state.clone();
    state.rate_limiter = Some(RateLimiterFacade::new(InMemoryRateLimiter::new(true), tight_limits()));
    let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(config)).await;

    let attempt = |i: u8| {
        test::TestRequest::post()
            .uri("/api/auth/login")
            .peer_addr("10.0.0.1:4000".parse().unwrap())
            .insert_header(("X-Forwarded-For", format!("1.2.3.{i}")))
            .set_json(json!({"username": ADMIN_USER, "password": "guess"}))
            .to_request()
    };
    assert_eq!(test::call_service(&app, attempt(1)).await.status(), StatusCode::UNAUTHORIZED);
    for i in 2..5 {
        assert_eq!(test::call_service(&app, attempt(i)).await.status(), StatusCode::TOO_MANY_REQUESTS, "xff 1.2.3.{i}");
    }
}

#[actix_web::test]
async fn forwarded_header_is_the_key_behind_a_trusted_proxy() {
    let env = TestEnv::new().await;
    let mut state = env.state.clone();
    state.rate_limiter = Some(RateLimiterFacade::new(InMemoryRateLimiter::new(true), tight_limits()));
    state.trust_proxy = true;
    let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(config)).await;

    let attempt = |client: &str| {
        test::TestRequest::post()
            .uri("/api/auth/login")
            .peer_addr("10.0.0.1:4000".parse().unwrap())
            .insert_header(("X-Forwarded-For", client.to_string()))
            .set_json(json!({"username": ADMIN_USER, "password": "guess"}))
            .to_request()
    };
    assert_eq!(test::call_service(&app, attempt("1.2.3.4")).await.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(test::call_service(&app, attempt("1.2.3.4")).await.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(test::call_service(&app, attempt("5.6.7.8")).await.status(), StatusCode::UNAUTHORIZED);
}
