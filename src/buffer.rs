//! Buffered byte streams over links.
//!
//! A [BuffStream] coalesces small writes into one transmission frame and
//! stages received data so callers can read byte-by-byte without a module
//! round trip each time. Streams live in a [BuffPool] and are addressed by
//! [StreamHandle]s carrying an (index, generation) pair: once a connection
//! closes and its slot is recycled, stale handles read as absent instead of
//! aliasing the next tenant's data.
//!
//! Streams take the [Driver] explicitly on every transfer; the pool holds no
//! reference to it.

use crate::serial::Serial;
use crate::types::LINK_COUNT;
use crate::wifi::Driver;
use alloc::boxed::Box;
use alloc::vec;
use fugit_timer::Timer;
use heapless::String;
use log::{error, info, warn};

/// Reference to a pooled stream, revalidated on every dereference.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct StreamHandle {
    index: u8,
    generation: u8,
}

/// One buffered stream bound to a link.
pub struct BuffStream {
    /// Bound link, `None` while unassigned
    link_id: Option<u8>,

    /// Accepting server port, disambiguates pool reuse
    server_port: u16,

    /// Pool generation, 0 = unassigned
    generation: u8,

    /// Send target for UDP links
    udp_peer: Option<(String<64>, u16)>,

    /// Sticky until the next fully acknowledged flush
    write_error: bool,

    rx: Box<[u8]>,
    rx_index: usize,
    rx_len: usize,

    tx: Box<[u8]>,
    tx_len: usize,
}

impl BuffStream {
    fn new(link_id: Option<u8>, server_port: u16, rx_size: usize, tx_size: usize, generation: u8) -> Self {
        Self {
            link_id,
            server_port,
            generation,
            udp_peer: None,
            write_error: false,
            rx: vec![0; rx_size].into_boxed_slice(),
            rx_index: 0,
            rx_len: 0,
            tx: vec![0; tx_size].into_boxed_slice(),
            tx_len: 0,
        }
    }

    pub fn link_id(&self) -> Option<u8> {
        self.link_id
    }

    pub fn server_port(&self) -> u16 {
        self.server_port
    }

    /// Binds a stream acquired before its link id was known (UDP setup).
    pub fn bind_link(&mut self, link_id: u8) {
        self.link_id = Some(link_id);
    }

    /// Sets the datagram target of a UDP stream. False if the host does not
    /// fit the stored bound.
    pub fn set_udp_peer(&mut self, host: &str, port: u16) -> bool {
        match String::try_from(host) {
            Ok(host) => {
                self.udp_peer = Some((host, port));
                true
            }
            Err(_) => {
                error!("UDP peer host too long");
                false
            }
        }
    }

    /// True after a flush whose acknowledged byte count did not match; clears
    /// on the next fully acknowledged flush.
    pub fn write_error(&self) -> bool {
        self.write_error
    }

    fn udp_peer_ref(&self) -> Option<(&str, u16)> {
        self.udp_peer.as_ref().map(|(host, port)| (host.as_str(), *port))
    }

    /// Buffers `data` for transmission, flushing whenever the buffer runs
    /// full. A large write into an empty buffer bypasses buffering and goes
    /// out directly. Returns how many bytes were taken.
    pub fn write<S, T, const TIMER_HZ: u32, const TX_SIZE: usize>(
        &mut self,
        drv: &mut Driver<S, T, TIMER_HZ, TX_SIZE>,
        data: &[u8],
    ) -> usize
    where
        S: Serial,
        T: Timer<TIMER_HZ>,
    {
        if self.link_id.is_none() {
            self.write_error = true;
            return 0;
        }
        if data.is_empty() {
            return 0;
        }
        if self.tx_len == 0 && data.len() > self.tx.len() {
            // nothing buffered and the buffer wouldn't fit it anyway
            return self.send_now(drv, data);
        }

        let mut written = 0;
        loop {
            let space = self.tx.len() - self.tx_len;
            let take = space.min(data.len() - written);
            self.tx[self.tx_len..self.tx_len + take].copy_from_slice(&data[written..written + take]);
            self.tx_len += take;
            written += take;

            if self.tx_len == self.tx.len() {
                self.flush(drv);
                if self.write_error {
                    return written;
                }
            }
            if written == data.len() {
                return written;
            }
            if self.tx_len == 0 && data.len() - written > self.tx.len() {
                return written + self.send_now(drv, &data[written..]);
            }
        }
    }

    /// Buffers a single byte.
    pub fn write_byte<S, T, const TIMER_HZ: u32, const TX_SIZE: usize>(
        &mut self,
        drv: &mut Driver<S, T, TIMER_HZ, TX_SIZE>,
        byte: u8,
    ) -> usize
    where
        S: Serial,
        T: Timer<TIMER_HZ>,
    {
        if self.link_id.is_none() || self.tx.is_empty() {
            return self.write(drv, &[byte]);
        }
        self.tx[self.tx_len] = byte;
        self.tx_len += 1;
        if self.tx_len == self.tx.len() {
            self.flush(drv);
            if self.write_error {
                return 0;
            }
        }
        1
    }

    /// Transmits the buffered bytes, if any. A short acknowledgement sets
    /// the sticky write error.
    pub fn flush<S, T, const TIMER_HZ: u32, const TX_SIZE: usize>(
        &mut self,
        drv: &mut Driver<S, T, TIMER_HZ, TX_SIZE>,
    ) where
        S: Serial,
        T: Timer<TIMER_HZ>,
    {
        if self.tx_len == 0 {
            return;
        }
        let Some(link_id) = self.link_id else {
            self.write_error = true;
            self.tx_len = 0;
            return;
        };
        let sent = drv
            .send_data(link_id, &self.tx[..self.tx_len], self.udp_peer_ref())
            .unwrap_or(0);
        self.write_error = sent != self.tx_len;
        self.tx_len = 0;
    }

    fn send_now<S, T, const TIMER_HZ: u32, const TX_SIZE: usize>(
        &mut self,
        drv: &mut Driver<S, T, TIMER_HZ, TX_SIZE>,
        data: &[u8],
    ) -> usize
    where
        S: Serial,
        T: Timer<TIMER_HZ>,
    {
        let Some(link_id) = self.link_id else {
            self.write_error = true;
            return 0;
        };
        drv.send_data(link_id, data, self.udp_peer_ref()).unwrap_or(0)
    }

    /// Free space in the transmit buffer.
    pub fn available_for_write(&self) -> usize {
        self.tx.len() - self.tx_len
    }

    /// Readable bytes: staged ones first, then whatever the module reports.
    /// When genuinely nothing is pending, the transmit buffer is flushed
    /// opportunistically: the caller may be polling for the reply to a
    /// request it never flushed.
    pub fn available<S, T, const TIMER_HZ: u32, const TX_SIZE: usize>(
        &mut self,
        drv: &mut Driver<S, T, TIMER_HZ, TX_SIZE>,
    ) -> usize
    where
        S: Serial,
        T: Timer<TIMER_HZ>,
    {
        let Some(link_id) = self.link_id else {
            return 0;
        };
        let mut available = self.rx_len - self.rx_index;
        if available == 0 {
            available = drv.avail_data(link_id);
        }
        if available == 0 {
            self.flush(drv);
        }
        available
    }

    fn fill_rx<S, T, const TIMER_HZ: u32, const TX_SIZE: usize>(
        &mut self,
        drv: &mut Driver<S, T, TIMER_HZ, TX_SIZE>,
    ) where
        S: Serial,
        T: Timer<TIMER_HZ>,
    {
        if self.rx_index < self.rx_len || self.available(drv) == 0 {
            return;
        }
        let Some(link_id) = self.link_id else {
            return;
        };
        self.rx_index = 0;
        self.rx_len = drv.recv_data(link_id, &mut self.rx).unwrap_or(0);
    }

    /// Reads up to `data.len()` bytes. The staging buffer is topped up only
    /// once fully drained; a large read into an exhausted staging buffer
    /// bypasses staging entirely.
    pub fn read<S, T, const TIMER_HZ: u32, const TX_SIZE: usize>(
        &mut self,
        drv: &mut Driver<S, T, TIMER_HZ, TX_SIZE>,
        data: &mut [u8],
    ) -> usize
    where
        S: Serial,
        T: Timer<TIMER_HZ>,
    {
        if data.is_empty() || self.available(drv) == 0 {
            return 0;
        }

        let mut total = 0;
        loop {
            let staged = self.rx_len - self.rx_index;
            if staged == 0 && data.len() - total > self.rx.len() {
                let Some(link_id) = self.link_id else {
                    return total;
                };
                return total + drv.recv_data(link_id, &mut data[total..]).unwrap_or(0);
            }

            self.fill_rx(drv);
            let take = (self.rx_len - self.rx_index).min(data.len() - total);
            data[total..total + take].copy_from_slice(&self.rx[self.rx_index..self.rx_index + take]);
            self.rx_index += take;
            total += take;

            if total == data.len() || self.available(drv) == 0 {
                return total;
            }
        }
    }

    /// Reads a single byte.
    pub fn read_byte<S, T, const TIMER_HZ: u32, const TX_SIZE: usize>(
        &mut self,
        drv: &mut Driver<S, T, TIMER_HZ, TX_SIZE>,
    ) -> Option<u8>
    where
        S: Serial,
        T: Timer<TIMER_HZ>,
    {
        let mut byte = [0u8; 1];
        if self.read(drv, &mut byte) == 1 {
            Some(byte[0])
        } else {
            None
        }
    }

    /// Next readable byte without consuming it.
    pub fn peek<S, T, const TIMER_HZ: u32, const TX_SIZE: usize>(
        &mut self,
        drv: &mut Driver<S, T, TIMER_HZ, TX_SIZE>,
    ) -> Option<u8>
    where
        S: Serial,
        T: Timer<TIMER_HZ>,
    {
        if self.available(drv) == 0 {
            return None;
        }
        self.fill_rx(drv);
        if self.rx_index < self.rx_len {
            Some(self.rx[self.rx_index])
        } else {
            None
        }
    }

    fn reset(&mut self) {
        self.link_id = None;
        self.server_port = 0;
        self.generation = 0;
        self.udp_peer = None;
        self.write_error = false;
        self.rx_index = 0;
        self.rx_len = 0;
        self.tx_len = 0;
    }
}

/// Pool of stream slots, reused across connections to amortize allocation.
pub struct BuffPool {
    pool: [Option<BuffStream>; LINK_COUNT],
    serial_id: u8,
}

impl Default for BuffPool {
    fn default() -> Self {
        Self::new()
    }
}

impl BuffPool {
    pub fn new() -> Self {
        Self {
            pool: core::array::from_fn(|_| None),
            serial_id: 0,
        }
    }

    /// Acquires a stream for `(link_id, server_port)` with the requested
    /// buffer capacities. Acquiring the binding of an already claimed slot
    /// returns the same handle (client and server-accept paths reference one
    /// accepted connection); an unassigned slot with matching capacities is
    /// rebound; otherwise a slot is newly allocated. `None` when the pool is
    /// exhausted.
    pub fn get(
        &mut self,
        link_id: Option<u8>,
        server_port: u16,
        rx_size: usize,
        tx_size: usize,
    ) -> Option<StreamHandle> {
        let mut free_index = None;
        let mut reuse_index = None;
        let mut clear_index = None;

        for (index, slot) in self.pool.iter().enumerate() {
            let Some(stream) = slot else {
                if free_index.is_none() {
                    free_index = Some(index);
                }
                continue;
            };
            if stream.generation != 0 {
                if link_id.is_some() && stream.link_id == link_id && stream.server_port == server_port {
                    if stream.rx.len() == rx_size && stream.tx.len() == tx_size {
                        info!("pool stream id {} at index {} re-acquired", stream.generation, index);
                        return Some(StreamHandle {
                            index: index as u8,
                            generation: stream.generation,
                        });
                    }
                    // same connection with different buffering means the
                    // claim is stale
                    error!("pool stream at index {} has mismatched buffers", index);
                    clear_index = Some(index);
                }
                continue;
            }
            if reuse_index.is_none() && stream.rx.len() == rx_size && stream.tx.len() == tx_size {
                reuse_index = Some(index);
            }
        }

        if let Some(index) = clear_index {
            if let Some(stream) = self.pool[index].as_mut() {
                stream.reset();
            }
        }

        if let Some(index) = reuse_index {
            let generation = self.next_serial_id();
            let stream = self.pool[index].as_mut()?;
            stream.link_id = link_id;
            stream.server_port = server_port;
            stream.generation = generation;
            info!("pool returned stream id {} at index {}", generation, index);
            return Some(StreamHandle {
                index: index as u8,
                generation,
            });
        }

        let Some(index) = free_index else {
            warn!("no free pool position");
            return None;
        };
        let generation = self.next_serial_id();
        self.pool[index] = Some(BuffStream::new(link_id, server_port, rx_size, tx_size, generation));
        info!(
            "pool new stream id {} at index {} rx {} tx {}",
            generation, index, rx_size, tx_size
        );
        Some(StreamHandle {
            index: index as u8,
            generation,
        })
    }

    /// The stream behind a handle, absent once the slot was released or
    /// recycled.
    pub fn stream(&mut self, handle: StreamHandle) -> Option<&mut BuffStream> {
        let stream = self.pool.get_mut(usize::from(handle.index))?.as_mut()?;
        if stream.generation == 0 || stream.generation != handle.generation {
            return None;
        }
        Some(stream)
    }

    /// Unbinds the stream behind the handle. The buffers stay allocated for
    /// reuse until [BuffPool::free_unused]; all outstanding handles turn
    /// absent.
    pub fn release(&mut self, handle: StreamHandle) {
        if let Some(stream) = self.stream(handle) {
            info!("pool released stream id {}", handle.generation);
            stream.reset();
        }
    }

    /// Drops the buffers of unassigned slots. Slots never move: handles are
    /// positional, so occupied slots keep their index.
    pub fn free_unused(&mut self) {
        for slot in self.pool.iter_mut() {
            if slot.as_ref().is_some_and(|stream| stream.generation == 0) {
                let stream = slot.take();
                if let Some(stream) = stream {
                    info!("pool freed buffers rx {} tx {}", stream.rx.len(), stream.tx.len());
                }
            }
        }
    }

    /// Next non-zero serial id not colliding with a live stream.
    fn next_serial_id(&mut self) -> u8 {
        loop {
            self.serial_id = self.serial_id.wrapping_add(1);
            if self.serial_id == 0 {
                continue;
            }
            let collision = self
                .pool
                .iter()
                .flatten()
                .any(|stream| stream.generation == self.serial_id);
            if !collision {
                return self.serial_id;
            }
        }
    }
}
