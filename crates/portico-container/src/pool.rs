// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Data-channel pool and allocation state.
//!
//! One record per data port, held in a fixed-size vector indexed by
//! `port - base`. A record is `in_use` from allocation until its response
//! has been fully handled. Sockets are owned by the pool while idle and
//! handed to exactly one request handler while in use, so the `in_use` flag
//! guards the only mutable hand-off.
//!
//! An idle keep-alive socket may die (or receive stray bytes) without anyone
//! reading it; both conditions are resolved lazily by a non-blocking probe at
//! the next allocation: stray bytes are discarded, a dead socket is dropped
//! and the allocation falls through to requesting a fresh connect.

use std::sync::Mutex;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::error::{ContainerError, Result};

/// How long to wait for the edge's data-port connect to land after the
/// allocation has been confirmed on the control channel.
const SOCKET_ATTACH_WAIT: Duration = Duration::from_secs(2);

#[derive(Debug)]
struct ChannelSlot {
    port: u16,
    in_use: bool,
    socket: Option<TcpStream>,
}

/// Outcome of reserving a channel.
#[derive(Debug)]
pub struct Allocation {
    pub port: u16,
    /// Present when an idle keep-alive socket could be reused immediately;
    /// absent when the edge must be asked to connect.
    pub socket: Option<TcpStream>,
}

/// The pool of data-channel records.
pub struct ChannelPool {
    base_port: u16,
    slots: Mutex<Vec<ChannelSlot>>,
    socket_attached: Notify,
}

impl ChannelPool {
    pub fn new(base_port: u16, count: u16) -> Self {
        let slots = (0..count)
            .map(|i| ChannelSlot {
                port: base_port + i,
                in_use: false,
                socket: None,
            })
            .collect();
        Self {
            base_port,
            slots: Mutex::new(slots),
            socket_attached: Notify::new(),
        }
    }

    pub fn base_port(&self) -> u16 {
        self.base_port
    }

    pub fn capacity(&self) -> usize {
        self.slots.lock().expect("pool lock poisoned").len()
    }

    pub fn in_use_count(&self) -> usize {
        self.slots
            .lock()
            .expect("pool lock poisoned")
            .iter()
            .filter(|s| s.in_use)
            .count()
    }

    /// Reserve the first free channel. A live idle socket is handed out for
    /// reuse; a dead one is dropped so the caller requests a fresh connect.
    pub fn try_allocate(&self) -> Result<Allocation> {
        let mut slots = self.slots.lock().expect("pool lock poisoned");
        let Some(slot) = slots.iter_mut().find(|s| !s.in_use) else {
            return Err(ContainerError::NoAvailableChannels);
        };
        slot.in_use = true;

        if let Some(mut socket) = slot.socket.take() {
            if probe_idle_socket(&mut socket) {
                return Ok(Allocation {
                    port: slot.port,
                    socket: Some(socket),
                });
            }
            debug!(port = slot.port, "idle data socket was dead; dropping");
        }
        Ok(Allocation {
            port: slot.port,
            socket: None,
        })
    }

    /// Store a socket accepted on a data port. Returns false if the port is
    /// not one of ours (the caller should close the socket).
    pub fn attach_socket(&self, port: u16, socket: TcpStream) -> bool {
        let mut slots = self.slots.lock().expect("pool lock poisoned");
        let Some(slot) = slot_for(&mut slots, self.base_port, port) else {
            return false;
        };
        if slot.socket.is_some() {
            debug!(port, "replacing stale data socket with new connection");
        }
        slot.socket = Some(socket);
        drop(slots);
        self.socket_attached.notify_waiters();
        true
    }

    /// Take the socket for an allocated channel, waiting briefly for the
    /// edge's connect to land.
    pub async fn take_socket(&self, port: u16) -> Result<TcpStream> {
        let deadline = tokio::time::Instant::now() + SOCKET_ATTACH_WAIT;
        loop {
            let notified = self.socket_attached.notified();
            {
                let mut slots = self.slots.lock().expect("pool lock poisoned");
                if let Some(slot) = slot_for(&mut slots, self.base_port, port)
                    && let Some(socket) = slot.socket.take()
                {
                    return Ok(socket);
                }
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(ContainerError::ChannelNotConnected { port });
            }
        }
    }

    /// Release a channel after a request. `socket` is returned for keep-alive
    /// reuse when the exchange ended cleanly; `None` when the handler tore
    /// the connection down.
    pub fn release(&self, port: u16, socket: Option<TcpStream>) {
        let mut slots = self.slots.lock().expect("pool lock poisoned");
        let Some(slot) = slot_for(&mut slots, self.base_port, port) else {
            warn!(port, "release for unknown data port");
            return;
        };
        slot.in_use = false;
        if let Some(socket) = socket {
            slot.socket = Some(socket);
        }
    }

    /// Clear `in_use` without touching the socket slot (failed allocation).
    pub fn clear_in_use(&self, port: u16) {
        let mut slots = self.slots.lock().expect("pool lock poisoned");
        if let Some(slot) = slot_for(&mut slots, self.base_port, port) {
            slot.in_use = false;
        }
    }
}

fn slot_for<'a>(
    slots: &'a mut [ChannelSlot],
    base_port: u16,
    port: u16,
) -> Option<&'a mut ChannelSlot> {
    let index = port.checked_sub(base_port)? as usize;
    slots.get_mut(index).filter(|s| s.port == port)
}

/// Non-blocking liveness check on an idle socket. Discards any stray bytes;
/// returns false when the peer has closed.
fn probe_idle_socket(socket: &mut TcpStream) -> bool {
    let mut scratch = [0u8; 4096];
    loop {
        match socket.try_read(&mut scratch) {
            Ok(0) => return false,
            Ok(n) => {
                debug!(bytes = n, "discarding stray bytes on idle data socket");
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return true,
            Err(_) => return false,
        }
    }
}
