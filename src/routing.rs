// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Routing-table collaborator (spec §6 "Routing-table handler", component
//! M). This core only reads contact records to resolve rendezvous
//! coordinates and public-key material; it never writes the store. The
//! in-memory map below is a reference implementation for tests, standing in
//! for whatever persistent routing table a peer application provides
//! (`original_source/base/routingtable.h`).

use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    pub kademlia_id: String,
    pub host_ip: String,
    pub host_port: u16,
    pub rendezvous_ip: String,
    pub rendezvous_port: u16,
    pub public_key: Vec<u8>,
    pub rtt_ms: u64,
    pub rank: u32,
}

pub trait RoutingTableHandler: Send + Sync {
    fn find_contact_by_id(&self, kademlia_id: &str) -> Option<Contact>;
    fn find_contact_by_addr(&self, host_ip: &str, host_port: u16) -> Option<Contact>;
}

/// Reference `RoutingTableHandler` over a plain in-memory table, used by
/// tests in place of a real persistent routing table.
#[derive(Default)]
pub struct InMemoryRoutingTable {
    by_id: RwLock<HashMap<String, Contact>>,
}

impl InMemoryRoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, contact: Contact) {
        self.by_id
            .write()
            .expect("routing table lock poisoned")
            .insert(contact.kademlia_id.clone(), contact);
    }
}

impl RoutingTableHandler for InMemoryRoutingTable {
    fn find_contact_by_id(&self, kademlia_id: &str) -> Option<Contact> {
        self.by_id
            .read()
            .expect("routing table lock poisoned")
            .get(kademlia_id)
            .cloned()
    }

    fn find_contact_by_addr(&self, host_ip: &str, host_port: u16) -> Option<Contact> {
        self.by_id
            .read()
            .expect("routing table lock poisoned")
            .values()
            .find(|c| c.host_ip == host_ip && c.host_port == host_port)
            .cloned()
    }
}
