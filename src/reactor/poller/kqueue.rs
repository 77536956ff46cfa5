use super::{Interest, Readiness};
use crate::error::{Error, last_code};
use crate::reactor::core::Token;

use libc::{
    EINTR, ENOENT, EV_ADD, EV_DELETE, EV_ENABLE, EV_EOF, EV_ERROR, EVFILT_READ, EVFILT_WRITE,
    close, kevent, kqueue, timespec,
};
use std::os::unix::io::RawFd;
use std::ptr;
use std::time::Duration;

pub(crate) struct KqueuePoller {
    kqueue: RawFd,
    events: Vec<kevent>,
}

impl KqueuePoller {
    pub(crate) fn new(capacity: usize) -> Result<Self, Error> {
        let kqueue = unsafe { kqueue() };
        if kqueue < 0 {
            return Err(Error::last_os_error());
        }

        let events = vec![change(0, EVFILT_READ, 0, 0); capacity.max(1)];

        Ok(KqueuePoller { kqueue, events })
    }

    /// Moves `fd` from the `previous` to the `next` interest set.
    pub(crate) fn update(
        &self,
        fd: RawFd,
        token: Token,
        previous: Interest,
        next: Interest,
    ) -> i32 {
        let mut changes = Vec::with_capacity(2);

        if next.read != previous.read {
            let flags = if next.read { EV_ADD | EV_ENABLE } else { EV_DELETE };
            changes.push(change(fd, EVFILT_READ, flags, token));
        }

        if next.write != previous.write {
            let flags = if next.write { EV_ADD | EV_ENABLE } else { EV_DELETE };
            changes.push(change(fd, EVFILT_WRITE, flags, token));
        }

        if changes.is_empty() {
            return 0;
        }

        let result = unsafe {
            kevent(
                self.kqueue,
                changes.as_ptr(),
                changes.len() as i32,
                ptr::null_mut(),
                0,
                ptr::null(),
            )
        };

        if result < 0 {
            let code = last_code();
            if code == -ENOENT && next.is_none() {
                return 0;
            }

            return code;
        }

        0
    }

    pub(crate) fn poll(&mut self, timeout: Option<Duration>, ready: &mut Vec<Readiness>) -> i32 {
        let deadline = timeout.map(|duration| timespec {
            tv_sec: duration.as_secs() as _,
            tv_nsec: duration.subsec_nanos() as _,
        });
        let deadline_ptr = deadline
            .as_ref()
            .map(|deadline| deadline as *const timespec)
            .unwrap_or(ptr::null());

        let count = unsafe {
            kevent(
                self.kqueue,
                ptr::null(),
                0,
                self.events.as_mut_ptr(),
                self.events.len() as i32,
                deadline_ptr,
            )
        };

        if count < 0 {
            let code = last_code();
            return if code == -EINTR { 0 } else { code };
        }

        for event in self.events.iter().take(count as usize) {
            let failed = event.flags & (EV_EOF | EV_ERROR) != 0;

            ready.push(Readiness {
                token: event.udata as usize as Token,
                readable: event.filter == EVFILT_READ || failed,
                writable: event.filter == EVFILT_WRITE || failed,
            });
        }

        count
    }
}

fn change(fd: RawFd, filter: i16, flags: u16, token: Token) -> kevent {
    kevent {
        ident: fd as usize,
        filter,
        flags,
        fflags: 0,
        data: 0,
        udata: token as usize as *mut _,
    }
}

impl Drop for KqueuePoller {
    fn drop(&mut self) {
        unsafe {
            close(self.kqueue);
        }
    }
}
