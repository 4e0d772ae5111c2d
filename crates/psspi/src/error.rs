//! Error types for the SPI controller driver.

/// Errors returned synchronously by the driver surface.
///
/// Bus-level faults (mode fault, overrun, underrun) are not represented
/// here; they are detected asynchronously by the interrupt-driven engine
/// and delivered through the status handler as a
/// [`StatusEvent`](crate::StatusEvent).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The device is mid-transfer and cannot be re-initialized. Stop or
    /// abort the transfer first.
    #[error("device is already started")]
    AlreadyStarted,
    /// A transfer is already in progress on this instance.
    #[error("a transfer is already in progress")]
    DeviceBusy,
}

/// Result alias used throughout the driver.
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(Error::AlreadyStarted.to_string(), "device is already started");
        assert_eq!(Error::DeviceBusy.to_string(), "a transfer is already in progress");
    }
}
