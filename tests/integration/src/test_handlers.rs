//! Operation overrides: body inspection alongside forwarding, and hijacking.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use awsgate_http::body::full;
    use awsgate_http::{
        OperationHandler, ProviderContext, ProxiedRequest, ProxyBody, ProxyError, S3Operation,
        S3Provider, ServiceRegistry,
    };
    use bytes::Bytes;
    use http::{Method, StatusCode};
    use http_body_util::BodyExt;
    use parking_lot::Mutex;

    use crate::{Gateway, Origin, SignedRequest, proxy_to};

    /// Forwards the upload and keeps a copy of the body.
    #[derive(Default)]
    struct AuditUpload {
        seen: Mutex<Vec<Bytes>>,
    }

    #[async_trait]
    impl OperationHandler for AuditUpload {
        async fn handle(
            &self,
            ctx: &ProviderContext,
            req: &mut ProxiedRequest,
        ) -> Result<http::Response<ProxyBody>, ProxyError> {
            let inspect = req.duplicate_body()?;
            let inbound = req.original_host().to_owned();
            let target = ctx.resolve_target(&inbound, "s3.amazonaws.com").await?;

            let (response, copy) = tokio::join!(req.forward_and_resign(&target), inspect.collect());
            let copy = copy.map_err(ProxyError::handler)?.to_bytes();
            self.seen.lock().push(copy);
            response
        }
    }

    /// Tries an unreachable mirror first, then the configured origin.
    struct FailoverUpload {
        mirror: &'static str,
    }

    #[async_trait]
    impl OperationHandler for FailoverUpload {
        async fn handle(
            &self,
            ctx: &ProviderContext,
            req: &mut ProxiedRequest,
        ) -> Result<http::Response<ProxyBody>, ProxyError> {
            let kept = req.duplicate_body()?;
            match req.forward_and_resign(self.mirror).await {
                Ok(response) => Ok(response),
                Err(ProxyError::Upstream(_)) => {
                    let inbound = req.original_host().to_owned();
                    let target = ctx.resolve_target(&inbound, "s3.amazonaws.com").await?;
                    req.set_body(kept);
                    req.forward_and_resign(&target).await
                }
                Err(err) => Err(err),
            }
        }
    }

    /// Answers reads itself, straight into the client sink.
    struct ServeFromCache;

    #[async_trait]
    impl OperationHandler for ServeFromCache {
        async fn handle(
            &self,
            _ctx: &ProviderContext,
            req: &mut ProxiedRequest,
        ) -> Result<http::Response<ProxyBody>, ProxyError> {
            let path = req.uri().path().to_owned();
            let sink = req.hijack()?;
            let mut response = http::Response::new(full(format!("cached {path}")));
            *response.status_mut() = StatusCode::IM_A_TEAPOT;
            sink.send(response)?;
            // Whatever is returned now is ignored by the engine.
            Err(ProxyError::handler("ignored after hijack"))
        }
    }

    async fn setup(provider: S3Provider) -> (Origin, Gateway) {
        let origin = Origin::start().await.unwrap();
        let mut registry = ServiceRegistry::new();
        registry.register(provider);
        let gateway = Gateway::start(proxy_to(&origin.host(), registry).unwrap())
            .await
            .unwrap();
        (origin, gateway)
    }

    #[tokio::test]
    async fn test_should_inspect_and_forward_same_body() {
        let audit = Arc::new(AuditUpload::default());
        let mut provider = S3Provider::new();
        provider.register_operation_handler(S3Operation::PutObject, audit.clone());
        let (origin, gateway) = setup(provider).await;

        let payload: String = (0..20_000).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
        let request =
            SignedRequest::for_proxy(Method::PUT, "/bucket/audited.txt", payload.clone()).unwrap();
        let response = request.send(&gateway).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let seen = origin.requests();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].verified);
        assert_eq!(seen[0].body, payload.as_bytes());

        let audited = audit.seen.lock().clone();
        assert_eq!(audited, [Bytes::from(payload)]);
    }

    #[tokio::test]
    async fn test_should_not_override_other_operations() {
        let audit = Arc::new(AuditUpload::default());
        let mut provider = S3Provider::new();
        provider.register_operation_handler(S3Operation::PutObject, audit.clone());
        let (origin, gateway) = setup(provider).await;

        let request = SignedRequest::for_proxy(Method::GET, "/bucket/audited.txt", "").unwrap();
        let response = request.send(&gateway).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(origin.requests().len(), 1);
        assert!(audit.seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_should_retry_forward_with_reinstalled_body() {
        let mut provider = S3Provider::new();
        provider.register_operation_handler(
            S3Operation::PutObject,
            Arc::new(FailoverUpload { mirror: "127.0.0.1:9" }),
        );
        let (origin, gateway) = setup(provider).await;

        let payload = "x".repeat(64 * 1024);
        let request =
            SignedRequest::for_proxy(Method::PUT, "/bucket/failover.txt", payload.clone()).unwrap();
        let response = request.send(&gateway).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let seen = origin.requests();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].verified);
        assert_eq!(seen[0].path_and_query, "/bucket/failover.txt");
        assert_eq!(seen[0].body, payload.as_bytes());
    }

    #[tokio::test]
    async fn test_should_deliver_hijacked_response_only() {
        let mut provider = S3Provider::new();
        provider.register_operation_handler(S3Operation::GetObject, Arc::new(ServeFromCache));
        let (origin, gateway) = setup(provider).await;

        let request = SignedRequest::for_proxy(Method::GET, "/bucket/hot.txt", "").unwrap();
        let response = request.send(&gateway).await.unwrap();
        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
        assert!(!response.headers().contains_key("x-amz-request-id"));
        assert_eq!(response.text().await.unwrap(), "cached /bucket/hot.txt");
        assert!(origin.requests().is_empty());
    }
}
