use crate::error::Error;
use crate::handle::Pipe;
use crate::reactor::core::Loop;
use crate::reactor::sys;
use crate::stream::StreamHandle;

use std::rc::Rc;

/// Unix domain stream handle.
pub type PipeHandle = StreamHandle<Pipe>;

impl StreamHandle<Pipe> {
    /// Creates a pipe able to pass descriptors alongside its bytes.
    pub fn init_ipc(event_loop: &Rc<Loop>) -> Rc<Self> {
        Self::with_ipc(event_loop, true)
    }

    /// Creates two connected pipes on `event_loop`.
    ///
    /// # Errors
    /// Fails when the OS cannot allocate the socket pair.
    pub fn pair(event_loop: &Rc<Loop>, ipc: bool) -> Result<(Rc<Self>, Rc<Self>), Error> {
        let (left_fd, right_fd) = sys::socketpair().map_err(Error::from_code)?;

        let left = Self::with_ipc(event_loop, ipc);
        let right = Self::with_ipc(event_loop, ipc);

        let open = |handle: &Rc<Self>, fd| {
            handle
                .token()
                .map_or(-libc::EBADF, |token| event_loop.open(token, fd))
        };
        let results = [(open(&left, left_fd), left_fd), (open(&right, right_fd), right_fd)];

        if let Some(&(code, _)) = results.iter().find(|(result, _)| *result < 0) {
            for (result, fd) in results {
                if result < 0 {
                    sys::close(fd);
                }
            }

            return Err(Error::from_code(code));
        }

        Ok((left, right))
    }

    /// Returns true if this pipe carries descriptors.
    pub fn ipc(&self) -> bool {
        self.is_ipc()
    }

    /// Descriptors received and waiting for [`accept`](StreamHandle::accept).
    pub fn pending(&self) -> usize {
        self.token()
            .map_or(0, |token| self.event_loop.pending_count(token))
    }
}
