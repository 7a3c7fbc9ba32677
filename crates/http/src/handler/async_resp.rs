use std::sync::{Arc, Mutex, PoisonError};

use crate::protocol::Response;

/// Shared handle to the response of one exchange.
///
/// Clones share the same [`Response`]. Dropping the last clone ends the response,
/// so a handler that forgets to call `end` still answers the client.
#[derive(Debug, Clone)]
pub struct AsyncResp {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    res: Mutex<Response>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let res = self.res.get_mut().unwrap_or_else(PoisonError::into_inner);
        if !res.is_completed() {
            res.end();
        }
    }
}

impl AsyncResp {
    pub fn new(res: Response) -> Self {
        Self { inner: Arc::new(Inner { res: Mutex::new(res) }) }
    }

    /// Runs `f` with exclusive access to the response.
    pub fn with<T, F>(&self, f: F) -> T
    where
        F: FnOnce(&mut Response) -> T,
    {
        let mut res = self.inner.res.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut res)
    }
}
