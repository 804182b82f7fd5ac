//! Exercises the event multiplexer and the paged set views against an
//! in-process mock `NamedCache` service, rather than mocking `tonic`
//! itself: the mock implements the generated server trait and is served
//! over a real loopback TCP listener, so these tests drive the exact
//! wire path production code does.

use std::{
    pin::Pin,
    sync::{Arc, Mutex},
    time::Duration,
};

use futures::Stream;
use named_cache_client::{listener::MapListener, named_map::NamedMap, serializer::JsonSerializer};
use named_cache_proto::{self as proto, named_cache_server::NamedCache};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{transport::Server, Request, Response, Status, Streaming};

type StreamResult<T> = Pin<Box<dyn Stream<Item = Result<T, Status>> + Send + 'static>>;

#[derive(Default)]
struct MockCache;

#[tonic::async_trait]
impl NamedCache for MockCache {
    type EventsStream = StreamResult<proto::ListenerResponse>;
    type NextKeySetPageStream = StreamResult<proto::KeyPageResponse>;
    type NextEntrySetPageStream = StreamResult<proto::EntryPageResponse>;
    type ValuesStream = StreamResult<proto::EntryPageResponse>;
    type EntriesStream = StreamResult<proto::EntryPageResponse>;

    async fn events(
        &self,
        request: Request<Streaming<proto::ListenerRequest>>,
    ) -> Result<Response<Self::EventsStream>, Status> {
        let mut inbound = request.into_inner();
        let (tx, rx) = mpsc::channel(32);

        tokio::spawn(async move {
            while let Some(Ok(req)) = inbound.message().await.transpose() {
                let ack = if req.subscribe {
                    proto::listener_response::Response::Subscribed(proto::Subscribed { uid: req.uid })
                } else {
                    proto::listener_response::Response::Unsubscribed(proto::Unsubscribed { uid: req.uid })
                };
                let _ = tx
                    .send(proto::ListenerResponse {
                        response: Some(ack),
                    })
                    .await;
            }
        });

        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }

    async fn get(&self, _request: Request<proto::GetRequest>) -> Result<Response<proto::GetResponse>, Status> {
        Ok(Response::new(proto::GetResponse {
            present: false,
            value: Vec::new(),
        }))
    }

    async fn put(&self, _request: Request<proto::PutRequest>) -> Result<Response<proto::PutResponse>, Status> {
        Ok(Response::new(proto::PutResponse {
            had_previous: false,
            previous_value: Vec::new(),
        }))
    }

    async fn remove(
        &self,
        _request: Request<proto::RemoveRequest>,
    ) -> Result<Response<proto::RemoveResponse>, Status> {
        Ok(Response::new(proto::RemoveResponse {
            had_previous: false,
            previous_value: Vec::new(),
        }))
    }

    async fn remove_mapping(
        &self,
        _request: Request<proto::RemoveMappingRequest>,
    ) -> Result<Response<proto::RemoveMappingResponse>, Status> {
        Ok(Response::new(proto::RemoveMappingResponse { removed: false }))
    }

    async fn contains_key(
        &self,
        _request: Request<proto::ContainsKeyRequest>,
    ) -> Result<Response<proto::ContainsKeyResponse>, Status> {
        Ok(Response::new(proto::ContainsKeyResponse { present: false }))
    }

    async fn size(&self, _request: Request<proto::SizeRequest>) -> Result<Response<proto::SizeResponse>, Status> {
        Ok(Response::new(proto::SizeResponse { size: 0 }))
    }

    async fn clear(&self, _request: Request<proto::ClearRequest>) -> Result<Response<proto::ClearResponse>, Status> {
        Ok(Response::new(proto::ClearResponse {}))
    }

    async fn truncate(
        &self,
        _request: Request<proto::TruncateRequest>,
    ) -> Result<Response<proto::TruncateResponse>, Status> {
        Ok(Response::new(proto::TruncateResponse {}))
    }

    async fn destroy(
        &self,
        _request: Request<proto::DestroyRequest>,
    ) -> Result<Response<proto::DestroyResponse>, Status> {
        Ok(Response::new(proto::DestroyResponse {}))
    }

    async fn invoke(
        &self,
        _request: Request<proto::InvokeRequest>,
    ) -> Result<Response<proto::InvokeResponse>, Status> {
        Ok(Response::new(proto::InvokeResponse { result: Vec::new() }))
    }

    async fn invoke_all(
        &self,
        _request: Request<proto::InvokeAllRequest>,
    ) -> Result<Response<proto::InvokeAllResponse>, Status> {
        Ok(Response::new(proto::InvokeAllResponse { results: Vec::new() }))
    }

    async fn aggregate(
        &self,
        _request: Request<proto::AggregateRequest>,
    ) -> Result<Response<proto::AggregateResponse>, Status> {
        Ok(Response::new(proto::AggregateResponse { result: Vec::new() }))
    }

    async fn next_key_set_page(
        &self,
        request: Request<proto::NextPageRequest>,
    ) -> Result<Response<Self::NextKeySetPageStream>, Status> {
        let cookie = request.into_inner().cookie;
        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(async move {
            if cookie.is_empty() {
                let _ = tx
                    .send(Ok(proto::KeyPageResponse {
                        part: Some(proto::key_page_response::Part::Cookie(vec![1])),
                    }))
                    .await;
                let _ = tx
                    .send(Ok(proto::KeyPageResponse {
                        part: Some(proto::key_page_response::Part::Key(b"k1".to_vec())),
                    }))
                    .await;
            } else {
                let _ = tx
                    .send(Ok(proto::KeyPageResponse {
                        part: Some(proto::key_page_response::Part::Cookie(Vec::new())),
                    }))
                    .await;
                let _ = tx
                    .send(Ok(proto::KeyPageResponse {
                        part: Some(proto::key_page_response::Part::Key(b"k2".to_vec())),
                    }))
                    .await;
            }
        });
        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }

    async fn next_entry_set_page(
        &self,
        _request: Request<proto::NextPageRequest>,
    ) -> Result<Response<Self::NextEntrySetPageStream>, Status> {
        let (tx, rx) = mpsc::channel(4);
        tokio::spawn(async move {
            let _ = tx
                .send(Ok(proto::EntryPageResponse {
                    part: Some(proto::entry_page_response::Part::Cookie(Vec::new())),
                }))
                .await;
        });
        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }

    async fn values(
        &self,
        _request: Request<proto::FilterPageRequest>,
    ) -> Result<Response<Self::ValuesStream>, Status> {
        let (tx, rx) = mpsc::channel(4);
        tokio::spawn(async move {
            let _ = tx
                .send(Ok(proto::EntryPageResponse {
                    part: Some(proto::entry_page_response::Part::Cookie(Vec::new())),
                }))
                .await;
        });
        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }

    async fn entries(
        &self,
        _request: Request<proto::FilterPageRequest>,
    ) -> Result<Response<Self::EntriesStream>, Status> {
        let (tx, rx) = mpsc::channel(4);
        tokio::spawn(async move {
            let _ = tx
                .send(Ok(proto::EntryPageResponse {
                    part: Some(proto::entry_page_response::Part::Cookie(Vec::new())),
                }))
                .await;
        });
        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }
}

async fn spawn_mock_server() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let incoming = tokio_stream::wrappers::TcpListenerStream::new(listener);

    tokio::spawn(async move {
        Server::builder()
            .add_service(proto::named_cache_server::NamedCacheServer::new(MockCache::default()))
            .serve_with_incoming(incoming)
            .await
            .unwrap();
    });

    format!("http://{addr}")
}

async fn connect(address: &str) -> proto::named_cache_client::NamedCacheClient<tonic::transport::Channel> {
    let endpoint = tonic::transport::Endpoint::from_shared(address.to_string()).unwrap();
    for _ in 0..50 {
        if let Ok(channel) = endpoint.connect().await {
            return proto::named_cache_client::NamedCacheClient::new(channel);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("mock server never became reachable");
}

#[tokio::test]
async fn key_set_streams_across_two_pages() {
    let address = spawn_mock_server().await;
    let client = connect(&address).await;
    let map = NamedMap::new(client, "people", JsonSerializer, Duration::from_secs(5));

    let mut key_set = map.key_set();
    let mut keys = Vec::new();
    while let Some(key) = key_set.next_key::<String>().await.unwrap() {
        keys.push(key);
    }
    assert_eq!(keys, vec!["k1".to_string(), "k2".to_string()]);
}

#[tokio::test]
async fn add_listener_for_key_completes_the_subscribe_handshake() {
    let address = spawn_mock_server().await;
    let client = connect(&address).await;
    let map = NamedMap::new(client, "people", JsonSerializer, Duration::from_secs(5));

    let received = Arc::new(Mutex::new(Vec::new()));
    let received_clone = received.clone();
    let listener = MapListener::builder()
        .on_inserted(move |event| {
            received_clone.lock().unwrap().push(event.key::<String>().unwrap());
        })
        .build();

    map.add_listener_for_key(&"k1".to_string(), listener, false)
        .await
        .expect("subscribe should be acked by the mock server");
}

#[tokio::test]
async fn size_returns_server_value_for_open_map() {
    let address = spawn_mock_server().await;
    let client = connect(&address).await;
    let map = NamedMap::new(client, "people", JsonSerializer, Duration::from_secs(5));

    assert_eq!(map.size().await.unwrap(), 0);
}

#[tokio::test]
async fn key_set_delegates_size_clear_and_delete_to_the_map() {
    let address = spawn_mock_server().await;
    let client = connect(&address).await;
    let map = NamedMap::new(client, "people", JsonSerializer, Duration::from_secs(5));

    let key_set = map.key_set();
    assert_eq!(key_set.size().await.unwrap(), 0);
    key_set.clear().await.unwrap();
    assert_eq!(key_set.delete(b"k1".to_vec()).await.unwrap(), false);
}

#[tokio::test]
async fn value_set_delete_is_unsupported() {
    let address = spawn_mock_server().await;
    let client = connect(&address).await;
    let map = NamedMap::new(client, "people", JsonSerializer, Duration::from_secs(5));

    let mut values = map.values();
    assert!(matches!(
        values.delete(b"v1"),
        Err(named_cache_client::ClientError::UnsupportedOperation(_))
    ));
}
