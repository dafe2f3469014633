use core::time::Duration;
use parking_lot::Mutex;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use strata_core::middleware::{handler_fn, middleware_fn};
use strata_core::{
    CallContext, Endpointer, Handler, Middleware, Phase, Result, Server, ServerConfig,
};
use strata_transport::GrpcServer;
use strata_transport::grpc::interceptor::interceptor_fn;
use strata_transport::grpc::{GrpcRequest, GrpcResponse};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tonic::Code;
use tonic::transport::Channel;
use tonic_health::pb::health_check_response::ServingStatus;
use tonic_health::pb::health_client::HealthClient;
use tonic_health::pb::HealthCheckRequest;

fn config() -> ServerConfig {
    ServerConfig::builder()
        .address("127.0.0.1:0")
        .shutdown_timeout(Duration::from_millis(200))
        .build()
        .unwrap()
}

fn spawn(server: &Arc<GrpcServer>) -> JoinHandle<Result<()>> {
    let server = Arc::clone(server);
    tokio::spawn(async move { server.start(CancellationToken::new()).await })
}

async fn client(server: &GrpcServer) -> HealthClient<Channel> {
    let endpoint = server.endpoint().unwrap();
    let dst = format!(
        "http://{}:{}",
        endpoint.host_str().unwrap(),
        endpoint.port().unwrap()
    );
    let channel = Channel::from_shared(dst).unwrap().connect().await.unwrap();
    HealthClient::new(channel)
}

fn check(service: &str) -> HealthCheckRequest {
    HealthCheckRequest {
        service: service.to_string(),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn ephemeral_port_endpoint_is_stable() {
    let config = ServerConfig::builder()
        .address(":0")
        .host_probe(|| Ok(IpAddr::V4(Ipv4Addr::LOCALHOST)))
        .build()
        .unwrap();
    let server = GrpcServer::builder(config).build().unwrap();

    let first = server.endpoint().unwrap();
    let second = server.endpoint().unwrap();
    assert_eq!(first, second);
    assert_eq!(first.scheme(), "grpc");
    assert!(first.port().is_some_and(|port| port != 0));
}

#[tokio::test(flavor = "multi_thread")]
async fn health_follows_the_lifecycle() {
    let server = Arc::new(GrpcServer::builder(config()).build().unwrap());
    let serving = spawn(&server);
    let mut client = client(&server).await;

    let status = client.check(check("")).await.unwrap().into_inner().status;
    assert_eq!(status, ServingStatus::Serving as i32);
    assert_eq!(server.phase(), Phase::Serving);

    server.stop().await.unwrap();
    serving.await.unwrap().unwrap();
    assert_eq!(server.phase(), Phase::Stopped);

    let after = client.check(check("")).await;
    assert!(
        !matches!(&after, Ok(res) if res.get_ref().status == ServingStatus::Serving as i32),
        "must never report SERVING after stop: {after:?}"
    );

    // A second stop is a no-op.
    server.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn watchers_see_shutdown_before_the_listener_closes() {
    let server = Arc::new(GrpcServer::builder(config()).build().unwrap());
    let serving = spawn(&server);
    let mut client = client(&server).await;

    let mut updates = client.watch(check("")).await.unwrap().into_inner();
    let first = updates.message().await.unwrap().unwrap();
    assert_eq!(first.status, ServingStatus::Serving as i32);

    let stopping = tokio::spawn({
        let server = Arc::clone(&server);
        async move { server.stop().await }
    });

    let next = tokio::time::timeout(Duration::from_secs(2), updates.message())
        .await
        .expect("watch should observe shutdown")
        .unwrap()
        .unwrap();
    assert_eq!(next.status, ServingStatus::NotServing as i32);

    stopping.await.unwrap().unwrap();
    serving.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn middleware_and_interceptors_wrap_every_call() {
    let seen: Arc<Mutex<Vec<(String, Option<Code>)>>> = Arc::default();
    let record: Middleware<GrpcRequest, GrpcResponse> = {
        let seen = Arc::clone(&seen);
        middleware_fn(move |next: Handler<GrpcRequest, GrpcResponse>| {
            let seen = Arc::clone(&seen);
            handler_fn(move |ctx: CallContext, req: GrpcRequest| {
                let next = Arc::clone(&next);
                let seen = Arc::clone(&seen);
                async move {
                    let method = ctx.info().full_method.clone();
                    let res = next(ctx, req).await;
                    seen.lock()
                        .push((method, res.as_ref().err().map(|e| e.code())));
                    res
                }
            })
        })
    };
    let require_token = interceptor_fn(|_ctx, metadata| match metadata.get("x-token") {
        Some(token) if token == "secret" => Ok(()),
        _ => Err(tonic::Status::unauthenticated("missing token")),
    });

    let server = Arc::new(
        GrpcServer::builder(config())
            .middleware(record)
            .interceptor(require_token)
            .build()
            .unwrap(),
    );
    let serving = spawn(&server);
    let mut client = client(&server).await;

    let denied = client.check(check("")).await.unwrap_err();
    assert_eq!(denied.code(), Code::Unauthenticated);
    assert_eq!(denied.message(), "missing token");

    let mut authorized = tonic::Request::new(check(""));
    authorized
        .metadata_mut()
        .insert("x-token", "secret".parse().unwrap());
    let ok = client.check(authorized).await.unwrap().into_inner();
    assert_eq!(ok.status, ServingStatus::Serving as i32);

    let mut unknown = tonic::Request::new(check("no.such.Service"));
    unknown
        .metadata_mut()
        .insert("x-token", "secret".parse().unwrap());
    let missing = client.check(unknown).await.unwrap_err();
    assert_eq!(missing.code(), Code::NotFound);

    let method = "/grpc.health.v1.Health/Check".to_string();
    assert_eq!(
        *seen.lock(),
        vec![
            (method.clone(), Some(Code::Unauthenticated)),
            (method.clone(), None),
            (method, Some(Code::NotFound)),
        ]
    );

    server.stop().await.unwrap();
    serving.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn start_twice_is_rejected() {
    let server = Arc::new(GrpcServer::builder(config()).build().unwrap());
    let serving = spawn(&server);
    let _client = client(&server).await;

    tokio::time::timeout(Duration::from_secs(2), async {
        while server.phase() != Phase::Serving {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("server should start");

    let again = server.start(CancellationToken::new()).await;
    assert!(matches!(again, Err(strata_core::Error::AlreadyStarted)));

    server.stop().await.unwrap();
    serving.await.unwrap().unwrap();
}
