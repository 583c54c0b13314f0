use std::{
    convert::Infallible,
    pin::Pin,
    task::{Context, Poll},
};

use axum::body::Bytes;
use hyper::body::{Body as HttpBody, Frame, SizeHint};

type Task = Box<dyn FnOnce() + Send + 'static>;

/// A fully buffered response body carrying a background task.
///
/// The task is scheduled once the last frame has been handed out, or when the
/// body is dropped without being read to the end (client went away, server
/// shutting down). It never runs more than once.
pub struct DeferredBody {
    data: Option<Bytes>,
    task: Option<Task>,
}

impl DeferredBody {
    pub fn new<F>(data: Bytes, task: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            data: Some(data),
            task: Some(Box::new(task)),
        }
    }

    fn schedule(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(task);
            }
            Err(_) => task(),
        }
    }
}

impl HttpBody for DeferredBody {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        match this.data.take() {
            Some(data) if !data.is_empty() => Poll::Ready(Some(Ok(Frame::data(data)))),
            _ => {
                this.schedule();
                Poll::Ready(None)
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.data.as_ref().map_or(true, Bytes::is_empty)
    }

    fn size_hint(&self) -> SizeHint {
        SizeHint::with_exact(self.data.as_ref().map_or(0, |data| data.len() as u64))
    }
}

impl Drop for DeferredBody {
    fn drop(&mut self) {
        self.schedule();
    }
}
