//! Upper-layer contracts
//!
//! The network stack above the link is a collaborator. It registers a device
//! for each attached card, receives what the card sends up, and hands
//! outbound buffers to a [`Submitter`](crate::queue::Submitter).

use std::sync::Arc;

use crate::error::Result;
use crate::queue::{Direction, Submitter};

/// Receiver of everything the link worker pulls off the card
///
/// Called from the worker thread only.
pub trait Upcalls: Send + Sync {
    /// A command response of exactly the length the card reported
    fn deliver_command_response(&self, response: &[u8]) -> Result<()>;

    /// A received data frame of exactly the length the card reported
    ///
    /// An error drops the frame; the link keeps running.
    fn deliver_received_packet(&self, frame: Vec<u8>) -> Result<()>;

    /// The card accepted the previous transfer in `direction`
    fn notify_prior_transfer_complete(&self, direction: Direction);

    /// Card event cause (low 8 bits of scratch 3)
    fn deliver_event(&self, cause: u8);
}

/// Network device registered for one card
pub trait NetDevice: Upcalls + 'static {
    /// Bring the device up; the link is already running
    fn start(&self) -> Result<()>;

    /// Take the device down
    fn stop(&self);

    /// The card is going away; pending work must not wait for it
    fn mark_surprise_removed(&self);
}

/// Network stack a card registers with
pub trait NetStack {
    /// Device type created for each card
    type Device: NetDevice;

    /// Register a card; the returned device receives the card's traffic
    fn add_card(&mut self, submitter: Submitter) -> Result<Self::Device>;

    /// Unregister a card after its worker has stopped
    fn remove_card(&mut self, device: Arc<Self::Device>);
}
