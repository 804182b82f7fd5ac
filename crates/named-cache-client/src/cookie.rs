/// Opaque server-chosen continuation token for pagination. An
/// empty cookie means "no further pages"; cookies are never constructed by
/// the client, only threaded verbatim from one page response into the next
/// page request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Cookie(Vec<u8>);

impl Cookie {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn empty_cookie_signals_no_more_pages() {
        assert!(Cookie::default().is_empty());
        assert!(Cookie::from_bytes(vec![]).is_empty());
        assert!(!Cookie::from_bytes(vec![1]).is_empty());
    }
}
