//! ISR-safe free-form debug log channel, independent of `defmt`'s compiled-in
//! structured tracing used elsewhere in this crate. The producer may be
//! called from interrupt context; the consumer drains on a regular task.
//!
//! Grounded on the `bbqueue`-backed logger pattern used for exactly this
//! purpose in other embedded Rust firmware: a bounded SPSC byte queue that
//! marks data loss on overflow instead of blocking or panicking.

use bbqueue::{ArrayLength, Consumer, Producer};

/// Appended in place of data that didn't fit, so the consumer can tell a
/// drop happened instead of silently losing bytes.
pub const DATA_LOST_MSG: &[u8] = b"...<data lost>\n";

pub struct LogProducer<'a, N: ArrayLength<u8>> {
    p: Producer<'a, N>,
    data_lost: bool,
}

pub struct LogConsumer<'a, N: ArrayLength<u8>> {
    c: Consumer<'a, N>,
}

impl<'a, N: ArrayLength<u8>> LogProducer<'a, N> {
    pub fn new(p: Producer<'a, N>) -> Self {
        Self { p, data_lost: false }
    }

    /// Enqueue `bytes`, marking loss (rather than blocking) if the queue
    /// doesn't have room. Safe to call from interrupt context.
    pub fn push(&mut self, bytes: &[u8]) {
        let mut remaining = bytes;
        while !remaining.is_empty() {
            let lost_len = if self.data_lost { DATA_LOST_MSG.len() } else { 0 };

            match self.p.grant_max_remaining(lost_len + remaining.len()) {
                Ok(mut grant) => {
                    let buf = grant.buf();
                    let mut written = 0;
                    if self.data_lost {
                        buf[..lost_len].copy_from_slice(DATA_LOST_MSG);
                        written += lost_len;
                        self.data_lost = false;
                    }
                    let n = (buf.len() - written).min(remaining.len());
                    buf[written..written + n].copy_from_slice(&remaining[..n]);
                    grant.commit(written + n);
                    remaining = &remaining[n..];
                }
                Err(_) => {
                    self.data_lost = true;
                    break;
                }
            }
        }
    }
}

impl<'a, N: ArrayLength<u8>> LogConsumer<'a, N> {
    pub fn new(c: Consumer<'a, N>) -> Self {
        Self { c }
    }

    /// Copy as many queued bytes as fit into `out`, returning the count.
    /// Intended to be called from a low-priority task that forwards to a
    /// serial port.
    pub fn drain_into(&mut self, out: &mut [u8]) -> usize {
        let grant = match self.c.read() {
            Ok(g) => g,
            Err(_) => return 0,
        };
        let n = grant.buf().len().min(out.len());
        out[..n].copy_from_slice(&grant.buf()[..n]);
        grant.release(n);
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bbqueue::{consts::U512, BBBuffer};

    #[test]
    fn push_then_drain_round_trips() {
        static BUF: BBBuffer<U512> = BBBuffer::new();
        let (p, c) = BUF.try_split().unwrap();
        let mut producer = LogProducer::new(p);
        let mut consumer = LogConsumer::new(c);

        producer.push(b"hello");
        let mut out = [0u8; 16];
        let n = consumer.drain_into(&mut out);
        assert_eq!(&out[..n], b"hello");
    }

    #[test]
    fn overflow_marks_data_lost() {
        static BUF: BBBuffer<U512> = BBBuffer::new();
        let (p, c) = BUF.try_split().unwrap();
        let mut producer = LogProducer::new(p);
        let mut consumer = LogConsumer::new(c);

        let chunk = [b'x'; 400];
        producer.push(&chunk);
        producer.push(&chunk); // doesn't fit; marks data_lost instead of blocking

        let mut out = [0u8; 512];
        let mut total = 0;
        loop {
            let n = consumer.drain_into(&mut out[total..]);
            if n == 0 {
                break;
            }
            total += n;
        }
        producer.push(b"tail");
        loop {
            let n = consumer.drain_into(&mut out[total..]);
            if n == 0 {
                break;
            }
            total += n;
        }

        let drained = &out[..total];
        assert!(drained.windows(DATA_LOST_MSG.len()).any(|w| w == DATA_LOST_MSG));
    }
}
