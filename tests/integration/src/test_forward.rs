//! Default forwarding: verified requests reach the origin re-signed.

#[cfg(test)]
mod tests {
    use awsgate_http::{S3Provider, ServiceRegistry};
    use http::{Method, StatusCode};

    use crate::{Gateway, Origin, PROXY_HOST, SignedRequest, proxy_to};

    async fn setup() -> (Origin, Gateway) {
        let origin = Origin::start().await.unwrap();
        let mut registry = ServiceRegistry::new();
        registry.register(S3Provider::new());
        let gateway = Gateway::start(proxy_to(&origin.host(), registry).unwrap())
            .await
            .unwrap();
        (origin, gateway)
    }

    #[tokio::test]
    async fn test_should_forward_get_with_fresh_signature() {
        let (origin, gateway) = setup().await;
        let request = SignedRequest::for_proxy(Method::GET, "/bucket/key.txt", "").unwrap();

        let response = request.send(&gateway).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-origin"], "loopback");
        assert_eq!(
            response.text().await.unwrap(),
            "origin saw GET /bucket/key.txt"
        );

        let seen = origin.requests();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].verified, "origin must accept the re-signed request");
        assert_eq!(seen[0].host, origin.host());
        assert_ne!(seen[0].host, PROXY_HOST);
        assert_ne!(seen[0].signature, request.signature());
    }

    #[tokio::test]
    async fn test_should_forward_put_body_unchanged() {
        let (origin, gateway) = setup().await;
        let payload = "x".repeat(256 * 1024);
        let request =
            SignedRequest::for_proxy(Method::PUT, "/bucket/large.bin", payload.clone()).unwrap();

        let response = request.send(&gateway).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let seen = origin.requests();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].verified);
        assert_eq!(seen[0].method, Method::PUT);
        assert_eq!(seen[0].body, payload.as_bytes());
    }

    #[tokio::test]
    async fn test_should_preserve_query_string() {
        let (origin, gateway) = setup().await;
        let request =
            SignedRequest::for_proxy(Method::GET, "/bucket?list-type=2&prefix=a%2Fb", "").unwrap();

        let response = request.send(&gateway).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let seen = origin.requests();
        assert_eq!(seen[0].path_and_query, "/bucket?list-type=2&prefix=a%2Fb");
        assert!(seen[0].verified);
    }

    #[tokio::test]
    async fn test_should_answer_health_check_without_credentials() {
        let (origin, gateway) = setup().await;

        let response = reqwest::get(gateway.url("/.internal/hc")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.text().await.unwrap(), "ok");
        assert!(origin.requests().is_empty());
    }
}
