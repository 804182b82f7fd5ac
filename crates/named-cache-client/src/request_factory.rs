//! Builds typed request records for every RPC the client issues, stamping
//! each request that expects an ack with a fresh [`CorrelationId`].
//! Request bodies the server treats as opaque (filters, processors,
//! aggregators) are accepted here as pre-serialized bytes; callers build
//! them with whatever factory helpers the server-side catalog defines.

use named_cache_proto as proto;

use crate::correlation::CorrelationId;

/// Builds requests scoped to one cache/map name.
#[derive(Debug, Clone)]
pub struct RequestFactory {
    cache: String,
}

impl RequestFactory {
    pub fn new(cache: impl Into<String>) -> Self {
        Self {
            cache: cache.into(),
        }
    }

    pub fn cache_name(&self) -> &str {
        &self.cache
    }

    // -- events() duplex stream requests -----------------------------------

    pub fn init(&self) -> (CorrelationId, proto::ListenerRequest) {
        let uid = CorrelationId::new();
        let request = proto::ListenerRequest {
            uid: uid.as_str().to_string(),
            r#type: proto::RequestType::Init as i32,
            subscribe: true,
            lite: false,
            scope: String::new(),
            cache: self.cache.clone(),
            target: None,
            filter_id: 0,
        };
        (uid, request)
    }

    pub fn subscribe_key(
        &self,
        key_bytes: Vec<u8>,
        lite: bool,
    ) -> (CorrelationId, proto::ListenerRequest) {
        self.key_request(key_bytes, true, lite)
    }

    pub fn unsubscribe_key(&self, key_bytes: Vec<u8>) -> (CorrelationId, proto::ListenerRequest) {
        self.key_request(key_bytes, false, false)
    }

    fn key_request(
        &self,
        key_bytes: Vec<u8>,
        subscribe: bool,
        lite: bool,
    ) -> (CorrelationId, proto::ListenerRequest) {
        let uid = CorrelationId::new();
        let request = proto::ListenerRequest {
            uid: uid.as_str().to_string(),
            r#type: if subscribe {
                proto::RequestType::Subscribe as i32
            } else {
                proto::RequestType::Unsubscribe as i32
            },
            subscribe,
            lite,
            scope: String::new(),
            cache: self.cache.clone(),
            target: Some(proto::listener_request::Target::Key(key_bytes)),
            filter_id: 0,
        };
        (uid, request)
    }

    pub fn subscribe_filter(
        &self,
        filter_bytes: Vec<u8>,
        filter_id: i32,
        lite: bool,
    ) -> (CorrelationId, proto::ListenerRequest) {
        self.filter_request(filter_bytes, filter_id, true, lite)
    }

    pub fn unsubscribe_filter(
        &self,
        filter_bytes: Vec<u8>,
        filter_id: i32,
    ) -> (CorrelationId, proto::ListenerRequest) {
        self.filter_request(filter_bytes, filter_id, false, false)
    }

    fn filter_request(
        &self,
        filter_bytes: Vec<u8>,
        filter_id: i32,
        subscribe: bool,
        lite: bool,
    ) -> (CorrelationId, proto::ListenerRequest) {
        let uid = CorrelationId::new();
        let request = proto::ListenerRequest {
            uid: uid.as_str().to_string(),
            r#type: if subscribe {
                proto::RequestType::Subscribe as i32
            } else {
                proto::RequestType::Unsubscribe as i32
            },
            subscribe,
            lite,
            scope: String::new(),
            cache: self.cache.clone(),
            target: Some(proto::listener_request::Target::Filter(filter_bytes)),
            filter_id,
        };
        (uid, request)
    }

    // -- unary requests ------------------------------------------------------

    pub fn get(&self, key: Vec<u8>) -> proto::GetRequest {
        proto::GetRequest {
            cache: self.cache.clone(),
            key,
        }
    }

    pub fn put(&self, key: Vec<u8>, value: Vec<u8>) -> proto::PutRequest {
        proto::PutRequest {
            cache: self.cache.clone(),
            key,
            value,
        }
    }

    pub fn remove(&self, key: Vec<u8>) -> proto::RemoveRequest {
        proto::RemoveRequest {
            cache: self.cache.clone(),
            key,
        }
    }

    pub fn remove_mapping(&self, key: Vec<u8>, value: Vec<u8>) -> proto::RemoveMappingRequest {
        proto::RemoveMappingRequest {
            cache: self.cache.clone(),
            key,
            value,
        }
    }

    pub fn contains_key(&self, key: Vec<u8>) -> proto::ContainsKeyRequest {
        proto::ContainsKeyRequest {
            cache: self.cache.clone(),
            key,
        }
    }

    pub fn size(&self) -> proto::SizeRequest {
        proto::SizeRequest {
            cache: self.cache.clone(),
        }
    }

    pub fn clear(&self) -> proto::ClearRequest {
        proto::ClearRequest {
            cache: self.cache.clone(),
        }
    }

    pub fn truncate(&self) -> proto::TruncateRequest {
        proto::TruncateRequest {
            cache: self.cache.clone(),
        }
    }

    pub fn destroy(&self) -> proto::DestroyRequest {
        proto::DestroyRequest {
            cache: self.cache.clone(),
        }
    }

    pub fn invoke(&self, key: Vec<u8>, processor: Vec<u8>) -> proto::InvokeRequest {
        proto::InvokeRequest {
            cache: self.cache.clone(),
            key,
            processor,
        }
    }

    pub fn invoke_all(&self, filter: Vec<u8>, processor: Vec<u8>) -> proto::InvokeAllRequest {
        proto::InvokeAllRequest {
            cache: self.cache.clone(),
            filter,
            processor,
        }
    }

    pub fn aggregate(&self, filter: Vec<u8>, aggregator: Vec<u8>) -> proto::AggregateRequest {
        proto::AggregateRequest {
            cache: self.cache.clone(),
            filter,
            aggregator,
        }
    }

    // -- paged server-stream requests ----------------------------------------

    pub fn next_key_page(&self, cookie: Vec<u8>) -> proto::NextPageRequest {
        proto::NextPageRequest {
            cache: self.cache.clone(),
            cookie,
        }
    }

    pub fn next_entry_page(&self, cookie: Vec<u8>) -> proto::NextPageRequest {
        proto::NextPageRequest {
            cache: self.cache.clone(),
            cookie,
        }
    }

    pub fn values(&self, filter: Vec<u8>, cookie: Vec<u8>) -> proto::FilterPageRequest {
        proto::FilterPageRequest {
            cache: self.cache.clone(),
            filter,
            cookie,
        }
    }

    pub fn entries(&self, filter: Vec<u8>, cookie: Vec<u8>) -> proto::FilterPageRequest {
        proto::FilterPageRequest {
            cache: self.cache.clone(),
            filter,
            cookie,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn correlation_ids_are_unique_per_request() {
        let factory = RequestFactory::new("people");
        let (id1, _) = factory.subscribe_key(b"k1".to_vec(), true);
        let (id2, _) = factory.subscribe_key(b"k1".to_vec(), true);
        assert_ne!(id1, id2);
    }

    #[test]
    fn key_request_carries_key_target() {
        let factory = RequestFactory::new("people");
        let (_, request) = factory.subscribe_key(b"k1".to_vec(), true);
        assert_eq!(
            request.target,
            Some(proto::listener_request::Target::Key(b"k1".to_vec()))
        );
        assert!(request.lite);
        assert!(request.subscribe);
    }

    #[test]
    fn filter_request_carries_filter_id() {
        let factory = RequestFactory::new("people");
        let (_, request) = factory.subscribe_filter(b"f1".to_vec(), 7, false);
        assert_eq!(request.filter_id, 7);
        assert_eq!(
            request.target,
            Some(proto::listener_request::Target::Filter(b"f1".to_vec()))
        );
    }
}
