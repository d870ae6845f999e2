//! Functions for receiving seals from the P2P network.

use std::{
    sync::mpsc::{Receiver, RecvTimeoutError, Sender, TryRecvError},
    thread::{self, JoinHandle},
    time::Duration,
};

use crate::types::seal::Seal;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Spawn the poller thread, which decodes the encoded seals the transport delivers on `inbound` and
/// forwards them to `seals`, where the [`StatesController`](crate::states::controller::StatesController)
/// picks them up.
///
/// Seals that fail to decode are logged and dropped.
pub(crate) fn start_polling(
    inbound: Receiver<Vec<u8>>,
    seals: Sender<Seal>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => return,
            Err(TryRecvError::Empty) => (),
        }

        match inbound.recv_timeout(POLL_INTERVAL) {
            Ok(bytes) => match Seal::decode(&bytes) {
                Ok(seal) => {
                    if seals.send(seal).is_err() {
                        return;
                    }
                }
                Err(err) => log::debug!("dropping undecodable seal: {}", err),
            },
            Err(RecvTimeoutError::Timeout) => (),
            Err(RecvTimeoutError::Disconnected) => return,
        }
    })
}
