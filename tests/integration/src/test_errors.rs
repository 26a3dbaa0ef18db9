//! Rejected requests never reach the origin and get JSON error bodies.

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use awsgate_http::{PassthroughProvider, S3Provider, ServiceRegistry};
    use http::{Method, StatusCode};

    use crate::{
        Gateway, KEY_ID, Origin, PROXY_HOST, SECRET, SignedRequest, error_body, proxy_to,
    };

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
    async fn test_should_reject_wrong_secret() {
        let (origin, gateway) = setup().await;
        let request =
            SignedRequest::new(Method::GET, PROXY_HOST, "/bucket/key", "", KEY_ID, "not-the-secret")
                .unwrap();

        let response = request.send(&gateway).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(response.headers().contains_key("x-amz-request-id"));
        let body = error_body(response).await.unwrap();
        assert_eq!(body["Code"], "SignatureDoesNotMatch");
        assert!(origin.requests().is_empty());
    }

    #[tokio::test]
    async fn test_should_reject_unknown_key() {
        let (origin, gateway) = setup().await;
        let request =
            SignedRequest::new(Method::GET, PROXY_HOST, "/bucket/key", "", "AKIDUNKNOWN", SECRET)
                .unwrap();

        let response = request.send(&gateway).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(error_body(response).await.unwrap()["Code"], "InvalidAccessKeyId");
        assert!(origin.requests().is_empty());
    }

    #[tokio::test]
    async fn test_should_reject_missing_and_malformed_authorization() {
        let (origin, gateway) = setup().await;

        let mut request = SignedRequest::for_proxy(Method::GET, "/bucket/key", "").unwrap();
        request.headers.remove(http::header::AUTHORIZATION);
        let response = request.send(&gateway).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error_body(response).await.unwrap()["Code"], "MissingSecurityHeader");

        let mut request = SignedRequest::for_proxy(Method::GET, "/bucket/key", "").unwrap();
        request.headers.insert(
            http::header::AUTHORIZATION,
            http::HeaderValue::from_static("AWS4-HMAC-SHA256 SignedHeaders=host, Signature=abc"),
        );
        let response = request.send(&gateway).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            error_body(response).await.unwrap()["Code"],
            "AuthorizationHeaderMalformed"
        );

        assert!(origin.requests().is_empty());
    }

    #[tokio::test]
    async fn test_should_reject_tampered_path() {
        let (origin, gateway) = setup().await;
        let mut request = SignedRequest::for_proxy(Method::GET, "/bucket/key", "").unwrap();
        request.path = "/bucket/other".to_owned();

        let response = request.send(&gateway).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(origin.requests().is_empty());
    }

    #[tokio::test]
    async fn test_should_answer_502_without_provider() {
        let (origin, gateway) = setup().await;
        let request =
            SignedRequest::new(Method::GET, "sqs.proxy.test", "/", "", KEY_ID, SECRET).unwrap();

        let response = request.send(&gateway).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(error_body(response).await.unwrap()["Code"], "ServiceNotFound");
        assert!(origin.requests().is_empty());
    }

    #[tokio::test]
    async fn test_should_answer_502_when_origin_unreachable() {
        let closed = TcpListener::bind("127.0.0.1:0").unwrap();
        let closed_host = closed.local_addr().unwrap().to_string();
        drop(closed);

        let mut registry = ServiceRegistry::new();
        registry.register(PassthroughProvider::new("s3"));
        let gateway = Gateway::start(proxy_to(&closed_host, registry).unwrap())
            .await
            .unwrap();

        let request = SignedRequest::for_proxy(Method::GET, "/bucket/key", "").unwrap();
        let response = request.send(&gateway).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(error_body(response).await.unwrap()["Code"], "BadGateway");
    }
}
