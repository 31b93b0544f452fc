//! End-to-end tests: a real server and client talking over TCP loopback.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use novarpc::auth::{server_auth_interceptor, BearerTokenAuth};
use novarpc::codec::SerializationType;
use novarpc::selector::{BalancedSelector, Node, Resolver};
use novarpc::service::unary_handler;
use novarpc::{Client, Code, Context, NovaError, Options, Server, ServerOptions, ServiceDesc};

#[derive(Serialize, Deserialize, Debug, PartialEq)]
struct HelloRequest {
    msg: String,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
struct HelloReply {
    msg: String,
}

fn greeter() -> ServiceDesc {
    ServiceDesc::new("hello.Greeter")
        .method(
            "SayHello",
            unary_handler(|_ctx, _req: HelloRequest| async move {
                Ok(HelloReply {
                    msg: "world".to_string(),
                })
            }),
        )
        .method(
            "Sleepy",
            unary_handler(|_ctx, req: HelloRequest| async move {
                tokio::time::sleep(Duration::from_secs(2)).await;
                Ok(HelloReply { msg: req.msg })
            }),
        )
        .method(
            "WhoAmI",
            unary_handler(|ctx: Context, _req: HelloRequest| async move {
                let user = ctx
                    .server_metadata()
                    .get("user")
                    .map(|v| String::from_utf8_lossy(v).into_owned())
                    .unwrap_or_default();
                Ok(HelloReply { msg: user })
            }),
        )
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

async fn start_greeter(opts: ServerOptions) -> (SocketAddr, CancellationToken) {
    init_tracing();
    let mut server = Server::new(opts);
    server.register_service(greeter());
    let token = server.shutdown_token();
    let addr = server.start().await.expect("server should bind");
    (addr, token)
}

fn msgpack_client(addr: SocketAddr) -> Client {
    Client::new(
        Options::new()
            .with_target(addr.to_string())
            .with_serialization(SerializationType::MsgPack),
    )
}

#[tokio::test]
async fn unary_success() {
    let (addr, _token) = start_greeter(
        ServerOptions::new().with_serialization(SerializationType::MsgPack),
    )
    .await;
    let client = msgpack_client(addr);

    let reply: HelloReply = client
        .invoke(
            Context::new(),
            &HelloRequest {
                msg: "hello".to_string(),
            },
            "/hello.Greeter/SayHello",
        )
        .await
        .expect("call should succeed");

    assert_eq!(reply.msg, "world");
}

#[tokio::test]
async fn unknown_method_returns_client_error() {
    let (addr, _token) = start_greeter(
        ServerOptions::new().with_serialization(SerializationType::MsgPack),
    )
    .await;
    let client = msgpack_client(addr);

    let err = client
        .invoke::<_, HelloReply>(
            Context::new(),
            &HelloRequest {
                msg: "hello".to_string(),
            },
            "/hello.Greeter/NotAMethod",
        )
        .await
        .unwrap_err();

    match err {
        NovaError::Rpc { code, message } => {
            assert_eq!(code, Code::ClientMsg);
            assert!(message.contains("handler"), "message: {message}");
        }
        other => panic!("expected rpc error, got {other}"),
    }
}

#[tokio::test]
async fn bad_magic_closes_the_connection() {
    let (addr, _token) = start_greeter(ServerOptions::new()).await;
    let mut conn = TcpStream::connect(addr).await.unwrap();

    // A full header whose first byte is not the magic.
    let mut bogus = vec![0u8; 64];
    bogus[0] = 0x00;
    conn.write_all(&bogus).await.unwrap();

    // The server closes after the 15-byte header; our next read sees EOF
    // or a reset.
    let mut buf = [0u8; 16];
    let outcome = tokio::time::timeout(Duration::from_secs(2), conn.read(&mut buf))
        .await
        .expect("server should close the connection promptly");
    match outcome {
        Ok(0) => {}
        Ok(n) => panic!("expected EOF, read {n} bytes"),
        Err(_) => {}
    }
}

#[tokio::test]
async fn slow_handler_times_out_on_the_client() {
    let (addr, _token) = start_greeter(
        ServerOptions::new().with_serialization(SerializationType::MsgPack),
    )
    .await;
    let client = Client::new(
        Options::new()
            .with_target(addr.to_string())
            .with_serialization(SerializationType::MsgPack)
            .with_timeout(Duration::from_millis(200)),
    );

    let start = Instant::now();
    let err = client
        .invoke::<_, HelloReply>(
            Context::new(),
            &HelloRequest {
                msg: "zzz".to_string(),
            },
            "/hello.Greeter/Sleepy",
        )
        .await
        .unwrap_err();
    let elapsed = start.elapsed();

    assert_eq!(err.code(), Code::Timeout);
    assert!(
        elapsed >= Duration::from_millis(150) && elapsed <= Duration::from_millis(500),
        "timed out after {elapsed:?}"
    );
}

fn token_check(ctx: &Context) -> novarpc::Result<()> {
    match ctx.server_metadata().get("authorization") {
        None => Err(NovaError::rpc(Code::ClientMsg, "token nil")),
        Some(token) if token == b"Bearer testToken".as_slice() => Ok(()),
        Some(_) => Err(NovaError::rpc(Code::ClientMsg, "token invalid")),
    }
}

#[tokio::test]
async fn auth_interceptor_rejects_and_admits() {
    let (addr, _token) = start_greeter(
        ServerOptions::new()
            .with_serialization(SerializationType::MsgPack)
            .with_interceptor(server_auth_interceptor(token_check)),
    )
    .await;

    // No credentials: rejected before the handler with the auth message.
    let bare = msgpack_client(addr);
    let err = bare
        .invoke::<_, HelloReply>(
            Context::new(),
            &HelloRequest {
                msg: "hello".to_string(),
            },
            "/hello.Greeter/SayHello",
        )
        .await
        .unwrap_err();
    match err {
        NovaError::Rpc { code, message } => {
            assert_ne!(code, Code::Ok);
            assert_eq!(message, "token nil");
        }
        other => panic!("expected rpc error, got {other}"),
    }

    // Correct token: admitted.
    let authed = Client::new(
        Options::new()
            .with_target(addr.to_string())
            .with_serialization(SerializationType::MsgPack)
            .with_per_rpc_auth(Arc::new(BearerTokenAuth::new("testToken"))),
    );
    let reply: HelloReply = authed
        .invoke(
            Context::new(),
            &HelloRequest {
                msg: "hello".to_string(),
            },
            "/hello.Greeter/SayHello",
        )
        .await
        .expect("authorized call should succeed");
    assert_eq!(reply.msg, "world");
}

#[tokio::test]
async fn oversized_payload_is_rejected_before_sending() {
    let (addr, _token) = start_greeter(
        ServerOptions::new().with_serialization(SerializationType::MsgPack),
    )
    .await;
    let client = msgpack_client(addr);

    let err = client
        .invoke::<_, HelloReply>(
            Context::new(),
            &HelloRequest {
                msg: "x".repeat(5 * 1024 * 1024),
            },
            "/hello.Greeter/SayHello",
        )
        .await
        .unwrap_err();

    assert_eq!(err.code(), Code::ClientMsg);
    assert!(err.to_string().contains("payload too large"));
}

#[tokio::test]
async fn metadata_travels_from_client_context_to_handler() {
    let (addr, _token) = start_greeter(
        ServerOptions::new().with_serialization(SerializationType::MsgPack),
    )
    .await;
    let client = msgpack_client(addr);

    let mut ctx = Context::new();
    ctx.client_metadata_mut().set("user", b"alice".to_vec());

    let reply: HelloReply = client
        .invoke(
            ctx,
            &HelloRequest {
                msg: String::new(),
            },
            "/hello.Greeter/WhoAmI",
        )
        .await
        .unwrap();
    assert_eq!(reply.msg, "alice");
}

#[tokio::test]
async fn json_serialization_round_trip() {
    let (addr, _token) = start_greeter(
        ServerOptions::new().with_serialization(SerializationType::Json),
    )
    .await;
    let client = Client::new(
        Options::new()
            .with_target(addr.to_string())
            .with_serialization(SerializationType::Json),
    );

    let reply: HelloReply = client
        .invoke(
            Context::new(),
            &HelloRequest {
                msg: "hello".to_string(),
            },
            "/hello.Greeter/SayHello",
        )
        .await
        .unwrap();
    assert_eq!(reply.msg, "world");
}

#[tokio::test]
async fn sequential_calls_reuse_one_connection() {
    let (addr, _token) = start_greeter(
        ServerOptions::new().with_serialization(SerializationType::MsgPack),
    )
    .await;
    let client = msgpack_client(addr);

    for _ in 0..5 {
        let reply: HelloReply = client
            .invoke(
                Context::new(),
                &HelloRequest {
                    msg: "hello".to_string(),
                },
                "/hello.Greeter/SayHello",
            )
            .await
            .unwrap();
        assert_eq!(reply.msg, "world");
    }
}

#[tokio::test]
async fn shutdown_stops_serving_new_connections() {
    let (addr, token) = start_greeter(
        ServerOptions::new().with_serialization(SerializationType::MsgPack),
    )
    .await;

    let client = msgpack_client(addr);
    let reply: HelloReply = client
        .invoke(
            Context::new(),
            &HelloRequest {
                msg: "hello".to_string(),
            },
            "/hello.Greeter/SayHello",
        )
        .await
        .unwrap();
    assert_eq!(reply.msg, "world");

    token.cancel();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // A fresh client (fresh connection) must not be served.
    let late = Client::new(
        Options::new()
            .with_target(addr.to_string())
            .with_serialization(SerializationType::MsgPack)
            .with_timeout(Duration::from_millis(500)),
    );
    let result = late
        .invoke::<_, HelloReply>(
            Context::new(),
            &HelloRequest {
                msg: "late".to_string(),
            },
            "/hello.Greeter/SayHello",
        )
        .await;
    assert!(result.is_err(), "server should be gone after shutdown");
}

/// Resolver over a fixed set of already-started servers.
struct StaticResolver {
    nodes: Vec<Node>,
}

#[async_trait::async_trait]
impl Resolver for StaticResolver {
    async fn resolve(&self, _service_name: &str) -> novarpc::Result<Vec<Node>> {
        Ok(self.nodes.clone())
    }
}

async fn start_tagged(tag: &str) -> (SocketAddr, CancellationToken) {
    let reply_tag = tag.to_string();
    let mut server = Server::new(
        ServerOptions::new().with_serialization(SerializationType::MsgPack),
    );
    server.register_service(ServiceDesc::new("echo.Tagged").method(
        "Tag",
        unary_handler(move |_ctx, _req: HelloRequest| {
            let reply_tag = reply_tag.clone();
            async move {
                Ok(HelloReply { msg: reply_tag })
            }
        }),
    ));
    let token = server.shutdown_token();
    let addr = server.start().await.unwrap();
    (addr, token)
}

#[tokio::test]
async fn balanced_selector_alternates_between_servers() {
    let (addr_a, _ta) = start_tagged("a").await;
    let (addr_b, _tb) = start_tagged("b").await;

    let node = |addr: SocketAddr| Node {
        service_name: "echo.Tagged".to_string(),
        address: addr.to_string(),
        network: "tcp".to_string(),
        weight: 0,
    };
    let selector = BalancedSelector::new(Arc::new(StaticResolver {
        nodes: vec![node(addr_a), node(addr_b)],
    }));

    let client = Client::new(
        Options::new()
            .with_serialization(SerializationType::MsgPack)
            .with_selector(Arc::new(selector)),
    );

    let mut tags = Vec::new();
    for _ in 0..4 {
        let reply: HelloReply = client
            .invoke(
                Context::new(),
                &HelloRequest {
                    msg: String::new(),
                },
                "/echo.Tagged/Tag",
            )
            .await
            .unwrap();
        tags.push(reply.msg);
    }

    assert_eq!(tags, vec!["a", "b", "a", "b"]);
}
