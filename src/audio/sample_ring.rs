// SampleRing - lock-free hand-off between a capture callback and the sampling tick
//
// The capture callback runs on a real-time thread and must never block or
// allocate. It pushes converted 8-bit samples into an SPSC ring buffer. The
// sampling tick drains whatever arrived since the last tick into a fixed-size
// history and copies out the most recent window, oldest first.
//
// Buffer flow:
// 1. Callback converts each frame's first channel to the 8-bit scale
// 2. Callback pushes into the ring, dropping samples when it is full
// 3. Tick drains the ring into the history window
// 4. Tick reads the window for RMS analysis

use rtrb::{Consumer, Producer, RingBuffer};

use crate::audio::level::SILENCE_MIDPOINT;

/// Default ring capacity: a little over a second at 48 kHz
pub const DEFAULT_RING_CAPACITY: usize = 65_536;

/// Producer half, owned by the capture callback
pub struct SampleWriter {
    producer: Producer<u8>,
    dropped: u64,
}

impl SampleWriter {
    /// Push samples; samples that do not fit are dropped and counted.
    pub fn push_slice(&mut self, samples: &[u8]) {
        for &sample in samples {
            if self.producer.push(sample).is_err() {
                self.dropped += 1;
            }
        }
    }

    pub fn push(&mut self, sample: u8) {
        if self.producer.push(sample).is_err() {
            self.dropped += 1;
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// Consumer half, owned by the analysis side
pub struct SampleWindow {
    consumer: Consumer<u8>,
    history: Vec<u8>,
    /// Next write position in `history`
    head: usize,
}

impl SampleWindow {
    /// Drain pending samples and copy the latest `out.len()` samples into `out`.
    ///
    /// Until enough samples have arrived the missing part reads as silence.
    pub fn read_latest(&mut self, out: &mut [u8]) {
        if self.history.len() != out.len() {
            self.history = vec![SILENCE_MIDPOINT as u8; out.len()];
            self.head = 0;
        }
        if out.is_empty() {
            while self.consumer.pop().is_ok() {}
            return;
        }

        while let Ok(sample) = self.consumer.pop() {
            self.history[self.head] = sample;
            self.head = (self.head + 1) % self.history.len();
        }

        let (newer, older) = self.history.split_at(self.head);
        out[..older.len()].copy_from_slice(older);
        out[older.len()..].copy_from_slice(newer);
    }
}

/// Create a connected writer/window pair.
///
/// # Arguments
/// * `capacity` - Ring capacity in samples (should exceed one tick of audio)
/// * `window_size` - Samples returned by each read
pub fn sample_ring(capacity: usize, window_size: usize) -> (SampleWriter, SampleWindow) {
    let (producer, consumer) = RingBuffer::new(capacity.max(1));
    (
        SampleWriter {
            producer,
            dropped: 0,
        },
        SampleWindow {
            consumer,
            history: vec![SILENCE_MIDPOINT as u8; window_size],
            head: 0,
        },
    )
}
