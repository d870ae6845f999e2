//! Pluggable peer-to-peer (P2P) networking.
//!
//! The consensus core reaches every remote node through the [`Channel`](channel::Channel) registered for
//! it in the [`Nodes`](nodes::Nodes) registry, and receives encoded seals from the transport on a plain
//! [`mpsc::Receiver`](std::sync::mpsc::Receiver).

pub mod channel;

pub mod nodes;

pub(crate) mod receiving;

pub mod sending;
