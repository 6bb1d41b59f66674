use tracing::info;

/// Counters kept by the bridge loops; dumped when a loop exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    pub eth_rx: u32,
    pub eth_rx_bytes: u64,
    pub eth_tx: u32,
    pub eth_tx_bytes: u64,
    pub eth_tx_err: u32,
    pub eth_dropped: u32,
    pub eth_consumed: u32,
    pub pb_recv: u32,
    pub pb_recv_bytes: u64,
    pub pb_send: u32,
    pub pb_send_bytes: u64,
    pub pb_err: u32,
    pub plip_tx: u32,
    pub plip_tx_err: u32,
    pub plip_retry_ok: u32,
    pub plip_dropped: u32,
    pub overwrite: u32,
    pub no_magic: u32,
    pub not_ipv4: u32,
}

impl BridgeStats {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn dump_all(&self) {
        info!(
            rx = self.eth_rx,
            rx_bytes = self.eth_rx_bytes,
            tx = self.eth_tx,
            tx_bytes = self.eth_tx_bytes,
            tx_err = self.eth_tx_err,
            dropped = self.eth_dropped,
            consumed = self.eth_consumed,
            "eth stats"
        );
        info!(
            recv = self.pb_recv,
            recv_bytes = self.pb_recv_bytes,
            send = self.pb_send,
            send_bytes = self.pb_send_bytes,
            err = self.pb_err,
            overwrite = self.overwrite,
            no_magic = self.no_magic,
            not_ipv4 = self.not_ipv4,
            "pb stats"
        );
        if self.plip_tx + self.plip_tx_err > 0 {
            info!(
                tx = self.plip_tx,
                err = self.plip_tx_err,
                retry_ok = self.plip_retry_ok,
                dropped = self.plip_dropped,
                "plip stats"
            );
        }
    }
}
