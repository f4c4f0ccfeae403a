//! Pending-response table for request/response exchanges.
//!
//! A sender registers the answer it expects and gets a [`Ticket`] back;
//! the receive thread offers every inbound packet to the table, which
//! fills the oldest matching record and wakes the sender. Records are
//! owned by the table alone. A ticket is a slot index plus a serial, so
//! a slot that timed out and was reused for a later request can never
//! hand its response to the wrong waiter, and an answer that arrives
//! after its waiter gave up simply finds no record and is dropped.

use core::time::Duration;
use std::sync::{Condvar, Mutex};
use std::time::Instant;

use crate::error::{KnxError, Result};
use crate::protocol::constants::ServiceType;
use crate::protocol::packet::KnxIpPacket;
use crate::tunnel::lock;

/// What a registered waiter is waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResponseKey {
    /// Any packet of this service type
    Service(ServiceType),
    /// A TUNNELING_REQUEST whose cEMI is an `L_Data.con` confirmation
    DataControl,
}

/// Handle to one registered wait
#[derive(Debug, Clone, Copy)]
pub(crate) struct Ticket {
    slot: usize,
    serial: u64,
}

#[derive(Debug)]
struct Record {
    serial: u64,
    key: ResponseKey,
    response: Option<KnxIpPacket>,
}

#[derive(Debug, Default)]
struct Slots {
    records: Vec<Option<Record>>,
    next_serial: u64,
}

/// Table of in-flight request/response exchanges
#[derive(Debug, Default)]
pub(crate) struct PendingTable {
    slots: Mutex<Slots>,
    wakeup: Condvar,
}

impl PendingTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a wait for `key`.
    ///
    /// Every ticket must be passed to [`wait`](Self::wait) or
    /// [`cancel`](Self::cancel), or its slot stays occupied.
    pub(crate) fn register(&self, key: ResponseKey) -> Ticket {
        let mut slots = lock(&self.slots);
        slots.next_serial += 1;
        let record = Record {
            serial: slots.next_serial,
            key,
            response: None,
        };
        let serial = record.serial;
        let slot = match slots.records.iter().position(Option::is_none) {
            Some(free) => {
                slots.records[free] = Some(record);
                free
            }
            None => {
                slots.records.push(Some(record));
                slots.records.len() - 1
            }
        };
        Ticket { slot, serial }
    }

    /// Block until the registered answer arrives or `timeout` elapses.
    ///
    /// The record is removed either way.
    pub(crate) fn wait(&self, ticket: Ticket, timeout: Duration) -> Result<KnxIpPacket> {
        let deadline = Instant::now() + timeout;
        let mut slots = lock(&self.slots);
        loop {
            let response = match slots.records.get_mut(ticket.slot).and_then(Option::as_mut) {
                Some(record) if record.serial == ticket.serial => record.response.take(),
                // Record removed, or the slot was reused for a later wait
                _ => return Err(KnxError::Timeout),
            };
            if let Some(packet) = response {
                slots.records[ticket.slot] = None;
                return Ok(packet);
            }

            let now = Instant::now();
            if now >= deadline {
                slots.records[ticket.slot] = None;
                return Err(KnxError::Timeout);
            }
            let (guard, _) = self
                .wakeup
                .wait_timeout(slots, deadline - now)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            slots = guard;
        }
    }

    /// Drop a registered wait without waiting
    pub(crate) fn cancel(&self, ticket: Ticket) {
        let mut slots = lock(&self.slots);
        let ours = slots
            .records
            .get(ticket.slot)
            .and_then(Option::as_ref)
            .is_some_and(|record| record.serial == ticket.serial);
        if ours {
            slots.records[ticket.slot] = None;
        }
    }

    /// Offer an inbound packet to the oldest waiter registered for `key`.
    ///
    /// Returns whether a waiter consumed it.
    pub(crate) fn resolve(&self, key: ResponseKey, packet: &KnxIpPacket) -> bool {
        let mut slots = lock(&self.slots);
        let record = slots
            .records
            .iter_mut()
            .flatten()
            .filter(|record| record.key == key && record.response.is_none())
            .min_by_key(|record| record.serial);
        match record {
            Some(record) => {
                record.response = Some(packet.clone());
                drop(slots);
                self.wakeup.notify_all();
                true
            }
            None => false,
        }
    }
}
