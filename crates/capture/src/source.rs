use std::future::Future;
use std::pin::Pin;

use crate::CaptureError;

/// Boxed future returned by [`CaptureSource`] methods.
pub type CaptureFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A live source that can be cut into independently decodable cycles.
///
/// The adapter calls `begin`, waits for the cycle interval, then calls
/// `finish` and expects the bytes of exactly that cycle.
pub trait CaptureSource: Send {
    /// Starts a new capture cycle.
    fn begin(&mut self) -> CaptureFuture<'_, Result<(), CaptureError>>;

    /// Finalizes the running cycle and returns its bytes.
    fn finish(&mut self) -> CaptureFuture<'_, Result<Vec<u8>, CaptureError>>;

    /// Resolves if the source stops on its own while a cycle is running
    /// (permission revoked, device unplugged, process exited).
    ///
    /// The default never resolves.
    fn ended(&mut self) -> CaptureFuture<'_, CaptureError> {
        Box::pin(std::future::pending())
    }
}

impl<S: CaptureSource + ?Sized> CaptureSource for Box<S> {
    fn begin(&mut self) -> CaptureFuture<'_, Result<(), CaptureError>> {
        (**self).begin()
    }

    fn finish(&mut self) -> CaptureFuture<'_, Result<Vec<u8>, CaptureError>> {
        (**self).finish()
    }

    fn ended(&mut self) -> CaptureFuture<'_, CaptureError> {
        (**self).ended()
    }
}
