//! Fluent builder for [`Loop`] construction.

use crate::error::Error;
use crate::reactor::core::Loop;

use std::rc::Rc;

const DEFAULT_MAX_EVENTS: usize = 64;
const DEFAULT_READ_BUFFER_SIZE: usize = 64 * 1024;
const DEFAULT_READS_PER_TICK: usize = 32;

/// Tunables of a running [`Loop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Readiness reports collected per poll.
    pub max_events: usize,
    /// Size of the buffer allocated for each read.
    pub read_buffer_size: usize,
    /// Reads attempted on one stream before moving on to the next.
    pub reads_per_tick: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_events: DEFAULT_MAX_EVENTS,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            reads_per_tick: DEFAULT_READS_PER_TICK,
        }
    }
}

/// Builder for constructing [`Loop`] instances with a fluent API.
///
/// # Example
/// ```ignore
/// let event_loop = LoopBuilder::new().read_buffer_size(4096).build()?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct LoopBuilder {
    config: Config,
}

impl LoopBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how many readiness reports a single poll may return.
    pub fn max_events(mut self, max_events: usize) -> Self {
        self.config.max_events = max_events.max(1);
        self
    }

    /// Sets the size of the buffer handed to each read.
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.config.read_buffer_size = size.max(1);
        self
    }

    /// Caps consecutive reads on one stream per readiness report.
    pub fn reads_per_tick(mut self, reads: usize) -> Self {
        self.config.reads_per_tick = reads.max(1);
        self
    }

    /// Builds the loop, creating its readiness backend.
    ///
    /// # Errors
    /// Fails when the OS refuses to create an epoll or kqueue instance.
    pub fn build(self) -> Result<Rc<Loop>, Error> {
        Loop::with_config(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_values_are_clamped() {
        let builder = LoopBuilder::new()
            .max_events(0)
            .read_buffer_size(0)
            .reads_per_tick(0);

        assert_eq!(builder.config.max_events, 1);
        assert_eq!(builder.config.read_buffer_size, 1);
        assert_eq!(builder.config.reads_per_tick, 1);
    }
}
