//! The surface request handlers are written against.
//!
//! A [`Handler`] is called once per exchange, after the request has been received
//! completely. It gets the request by reference and the response wrapped in an
//! [`AsyncResp`]. The response is sent when the handler calls
//! [`Response::end`](crate::protocol::Response::end) or when the last clone of the
//! [`AsyncResp`] is dropped, whichever happens first. Handlers that need to wait
//! for something move a clone into a spawned task.

mod async_resp;

pub use async_resp::AsyncResp;

use crate::protocol::Request;

pub trait Handler: Send + Sync {
    fn handle(&self, request: &Request, response: AsyncResp);
}

#[derive(Debug)]
pub struct HandlerFn<F> {
    f: F,
}

impl<F> Handler for HandlerFn<F>
where
    F: Fn(&Request, AsyncResp) + Send + Sync,
{
    fn handle(&self, request: &Request, response: AsyncResp) {
        (self.f)(request, response);
    }
}

pub fn make_handler<F>(f: F) -> HandlerFn<F>
where
    F: Fn(&Request, AsyncResp) + Send + Sync,
{
    HandlerFn { f }
}
