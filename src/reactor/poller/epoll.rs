use super::{Interest, Readiness};
use crate::error::{Error, last_code};
use crate::reactor::core::Token;

use libc::{
    EINTR, ENOENT, EPOLL_CLOEXEC, EPOLL_CTL_ADD, EPOLL_CTL_DEL, EPOLL_CTL_MOD, EPOLLERR,
    EPOLLHUP, EPOLLIN, EPOLLOUT, EPOLLRDHUP, close, epoll_create1, epoll_ctl, epoll_event,
    epoll_wait,
};
use std::os::unix::io::RawFd;
use std::ptr;
use std::time::Duration;

pub(crate) struct EpollPoller {
    epoll: RawFd,
    events: Vec<epoll_event>,
}

impl EpollPoller {
    pub(crate) fn new(capacity: usize) -> Result<Self, Error> {
        let epoll = unsafe { epoll_create1(EPOLL_CLOEXEC) };
        if epoll < 0 {
            return Err(Error::last_os_error());
        }

        let events = vec![epoll_event { events: 0, u64: 0 }; capacity.max(1)];

        Ok(Self { epoll, events })
    }

    /// Moves `fd` from the `previous` to the `next` interest set.
    pub(crate) fn update(
        &self,
        fd: RawFd,
        token: Token,
        previous: Interest,
        next: Interest,
    ) -> i32 {
        let operation = match (previous.is_none(), next.is_none()) {
            (true, true) => return 0,
            (true, false) => EPOLL_CTL_ADD,
            (false, true) => EPOLL_CTL_DEL,
            (false, false) => EPOLL_CTL_MOD,
        };

        let mut flags = 0;
        if next.read {
            flags |= EPOLLIN | EPOLLRDHUP;
        }
        if next.write {
            flags |= EPOLLOUT;
        }

        let mut event = epoll_event {
            events: flags as u32,
            u64: token,
        };

        let event_ptr = if operation == EPOLL_CTL_DEL {
            ptr::null_mut()
        } else {
            &mut event as *mut epoll_event
        };

        let result = unsafe { epoll_ctl(self.epoll, operation, fd, event_ptr) };
        if result < 0 {
            let code = last_code();
            // Closing a descriptor already drops it from the interest list.
            if operation == EPOLL_CTL_DEL && code == -ENOENT {
                return 0;
            }

            return code;
        }

        0
    }

    pub(crate) fn poll(&mut self, timeout: Option<Duration>, ready: &mut Vec<Readiness>) -> i32 {
        let timeout_ms = match timeout {
            None => -1,
            Some(duration) => duration.as_millis().min(i32::MAX as u128) as i32,
        };

        let count = unsafe {
            epoll_wait(
                self.epoll,
                self.events.as_mut_ptr(),
                self.events.len() as i32,
                timeout_ms,
            )
        };

        if count < 0 {
            let code = last_code();
            return if code == -EINTR { 0 } else { code };
        }

        for event in self.events.iter().take(count as usize) {
            let flags = event.events as i32;
            let failed = flags & (EPOLLERR | EPOLLHUP) != 0;

            ready.push(Readiness {
                token: event.u64,
                readable: failed || flags & (EPOLLIN | EPOLLRDHUP) != 0,
                writable: failed || flags & EPOLLOUT != 0,
            });
        }

        count
    }
}

impl Drop for EpollPoller {
    fn drop(&mut self) {
        unsafe {
            close(self.epoll);
        }
    }
}
