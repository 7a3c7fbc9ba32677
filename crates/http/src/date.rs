//! Cached `Date` header value.
//!
//! Formatting an HTTP date for every response is wasteful when many responses
//! are produced within the same second. The service keeps the last formatted
//! value and only formats again once the wall clock has moved to another second.
//! Readers never block, the value is swapped atomically.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use arc_swap::ArcSwap;
use bytes::Bytes;
use http::HeaderValue;
use once_cell::sync::Lazy;

static DATE_SERVICE: Lazy<DateService> = Lazy::new(DateService::new);

#[derive(Debug)]
pub struct DateService {
    current: ArcSwap<Stamp>,
}

#[derive(Debug)]
struct Stamp {
    second: u64,
    value: Bytes,
}

impl Stamp {
    fn now() -> Self {
        let second = unix_seconds();
        let mut buf = faf_http_date::get_date_buff_no_key();
        faf_http_date::get_date_no_key(&mut buf);
        Self { second, value: Bytes::from_owner(buf) }
    }
}

impl DateService {
    /// Returns the process wide instance.
    pub fn get_global_instance() -> &'static DateService {
        &DATE_SERVICE
    }

    fn new() -> Self {
        Self { current: ArcSwap::from_pointee(Stamp::now()) }
    }

    /// Returns the current date, formatted as an HTTP date.
    pub fn http_date(&self) -> HeaderValue {
        let current = self.current.load();
        let value = if current.second == unix_seconds() {
            current.value.clone()
        } else {
            let fresh = Arc::new(Stamp::now());
            let value = fresh.value.clone();
            self.current.store(fresh);
            value
        };

        HeaderValue::from_maybe_shared(value).unwrap_or_else(|_e| HeaderValue::from_static("Thu, 01 Jan 1970 00:00:00 GMT"))
    }
}

fn unix_seconds() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |elapsed| elapsed.as_secs())
}
