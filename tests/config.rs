fn test_runtime(upstream_base_url: &str) -> chatrelay::config::RuntimeConfig {
    chatrelay::config::RuntimeConfig {
        listen: "127.0.0.1:0".to_string(),
        upstream_base_url: upstream_base_url.to_string(),
        metrics_path: "/internal/metrics".to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn state_keeps_runtime_config() {
    let state = chatrelay::app::load_state_with_runtime(test_runtime("http://127.0.0.1:9/v1"))
        .expect("load state");
    assert_eq!(state.runtime.upstream_base_url, "http://127.0.0.1:9/v1");
    assert_eq!(state.runtime.metrics_path, "/internal/metrics");
}

#[tokio::test]
async fn state_can_be_loaded_repeatedly() {
    // The metrics recorder is process-global; a second load must reuse it.
    for _ in 0..2 {
        chatrelay::app::load_state_with_runtime(test_runtime("http://127.0.0.1:9"))
            .expect("load state");
    }
}

#[tokio::test]
async fn custom_metrics_path_is_routed() {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    let state = chatrelay::app::load_state_with_runtime(test_runtime("http://127.0.0.1:9"))
        .expect("load state");
    let router = chatrelay::app::build_app(state);
    let req = Request::builder()
        .uri("/internal/metrics")
        .body(Body::empty())
        .unwrap();
    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}
