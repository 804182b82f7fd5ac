//! Chains a server-streaming page RPC into a single logical stream of
//! items, hiding the cookie/page-boundary protocol from callers.
//!
//! Every page RPC this client drives follows the same envelope: the first
//! message on the stream carries only a continuation cookie, every message
//! after that carries one item. An empty cookie means the page that just
//! arrived is the last one.

use std::collections::VecDeque;

use async_trait::async_trait;
use futures::Stream;

use crate::{cookie::Cookie, error::ClientError};

/// Loads one page at a time from whatever paged RPC a `PageAdvancer` is
/// driving. Implementors own the actual `tonic` call; this crate's
/// `PageAdvancer` only knows how to sequence calls to `load_page`.
#[async_trait]
pub trait PageHelper: Send + Sync {
    type Raw: Send;

    async fn load_page(&self, cookie: Cookie) -> Result<(Cookie, Vec<Self::Raw>), ClientError>;
}

/// Buffers one page of raw items at a time and fetches the next page only
/// once the buffer is drained.
pub struct PageAdvancer<H: PageHelper> {
    helper: H,
    buffer: VecDeque<H::Raw>,
    cookie: Cookie,
    exhausted: bool,
}

impl<H: PageHelper> PageAdvancer<H> {
    pub fn new(helper: H) -> Self {
        Self {
            helper,
            buffer: VecDeque::new(),
            cookie: Cookie::default(),
            exhausted: false,
        }
    }

    /// Returns the next item, fetching a new page from the server only
    /// when the current one is exhausted. Returns `Ok(None)` once the
    /// server has signalled there are no more pages.
    pub async fn next(&mut self) -> Result<Option<H::Raw>, ClientError> {
        loop {
            if let Some(item) = self.buffer.pop_front() {
                return Ok(Some(item));
            }
            if self.exhausted {
                return Ok(None);
            }

            let (cookie, items) = self.helper.load_page(self.cookie.clone()).await?;
            self.exhausted = cookie.is_empty();
            self.cookie = cookie;
            self.buffer.extend(items);

            if self.buffer.is_empty() && self.exhausted {
                return Ok(None);
            }
        }
    }

    /// Adapts this advancer into a `futures::Stream`, for callers that want
    /// combinator-style consumption instead of manual polling.
    pub fn into_stream(self) -> impl Stream<Item = Result<H::Raw, ClientError>> {
        futures::stream::unfold(self, |mut advancer| async move {
            match advancer.next().await {
                Ok(Some(item)) => Some((Ok(item), advancer)),
                Ok(None) => None,
                Err(error) => Some((Err(error), advancer)),
            }
        })
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::StreamExt;

    use super::*;

    struct FakePages {
        pages: Vec<(Vec<u8>, Vec<u32>)>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PageHelper for FakePages {
        type Raw = u32;

        async fn load_page(&self, _cookie: Cookie) -> Result<(Cookie, Vec<u32>), ClientError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let (cookie_bytes, items) = self.pages[call].clone();
            Ok((Cookie::from_bytes(cookie_bytes), items))
        }
    }

    #[tokio::test]
    async fn drains_buffered_page_before_fetching_the_next() {
        let helper = FakePages {
            pages: vec![
                (vec![1], vec![1, 2, 3]),
                (vec![], vec![4, 5]),
            ],
            calls: AtomicUsize::new(0),
        };
        let mut advancer = PageAdvancer::new(helper);

        let mut collected = Vec::new();
        while let Some(item) = advancer.next().await.unwrap() {
            collected.push(item);
        }
        assert_eq!(collected, vec![1, 2, 3, 4, 5]);
        assert_eq!(advancer.helper.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn empty_first_page_with_empty_cookie_ends_immediately() {
        let helper = FakePages {
            pages: vec![(vec![], vec![])],
            calls: AtomicUsize::new(0),
        };
        let mut advancer = PageAdvancer::new(helper);
        assert_eq!(advancer.next().await.unwrap(), None);
    }

    #[tokio::test]
    async fn into_stream_yields_every_item_across_pages() {
        let helper = FakePages {
            pages: vec![(vec![1], vec![1]), (vec![], vec![2, 3])],
            calls: AtomicUsize::new(0),
        };
        let stream = PageAdvancer::new(helper).into_stream();
        let items: Vec<u32> = stream.map(|r| r.unwrap()).collect().await;
        assert_eq!(items, vec![1, 2, 3]);
    }
}
