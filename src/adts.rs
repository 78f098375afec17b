//! ADTS frame resynchronisation for retransmitting AAC byte streams.
//!
//! Encoders and relays hand over chunks whose boundaries have nothing to do
//! with frame boundaries. [`AdtsResync`] locates frame headers, carries split
//! headers and partially sent frames across calls, and forwards only byte
//! ranges that start on a frame boundary. Bytes that do not belong to a valid
//! frame are never forwarded.

use tracing::debug;

/// Bytes that must be available before a header is examined.
pub const HEADER_SCAN_BYTES: usize = 9;
/// Header length without CRC.
pub const HEADER_BYTES: usize = 7;
/// Header length with CRC.
pub const HEADER_BYTES_CRC: usize = 9;

const SAMPLING_FREQUENCIES: [u32; 13] = [
    96_000, 88_200, 64_000, 48_000, 44_100, 32_000, 24_000, 22_050, 16_000, 12_000, 11_025,
    8_000, 7_350,
];

/// Errors reported by the resynchroniser.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum AdtsError {
    /// The forwarding primitive accepted fewer bytes than offered.
    #[error("short forward: sent {sent} of {requested} bytes")]
    ShortForward {
        /// Bytes offered.
        requested: usize,
        /// Bytes accepted.
        sent: usize,
    },
}

/// Destination for frame-aligned byte ranges.
pub trait RawForward {
    /// Send `data`, returning the number of bytes actually sent.
    fn forward(&mut self, data: &[u8]) -> usize;
}

impl<F: FnMut(&[u8]) -> usize> RawForward for F {
    fn forward(&mut self, data: &[u8]) -> usize {
        self(data)
    }
}

/// Fixed and variable header fields of one ADTS frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AdtsHeader {
    /// `true` for MPEG-2, `false` for MPEG-4.
    pub mpeg2: bool,
    /// Whether a 16-bit CRC follows the header.
    pub has_crc: bool,
    /// Audio object type minus one.
    pub profile: u8,
    /// Sampling frequency index, 0 to 12.
    pub sampling_index: u8,
    /// Channel configuration.
    pub channel_config: u8,
    /// Frame length including the header.
    pub frame_length: usize,
    /// Buffer fullness, `0x7FF` for variable bitrate.
    pub buffer_fullness: u16,
    /// Number of raw data blocks in the frame.
    pub raw_blocks: u8,
}

impl AdtsHeader {
    /// Parse a header at the start of `data`. Returns `None` unless the
    /// header is complete and valid.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < HEADER_BYTES {
            return None;
        }
        if data[0] != 0xFF || data[1] & 0xF0 != 0xF0 {
            return None;
        }
        let layer = (data[1] >> 1) & 0x03;
        if layer != 0 {
            return None;
        }
        let has_crc = data[1] & 0x01 == 0;
        let sampling_index = (data[2] >> 2) & 0x0F;
        if sampling_index as usize >= SAMPLING_FREQUENCIES.len() {
            return None;
        }
        let frame_length = (((data[3] & 0x03) as usize) << 11)
            | ((data[4] as usize) << 3)
            | ((data[5] >> 5) as usize);
        let min_length = if has_crc { HEADER_BYTES_CRC } else { HEADER_BYTES };
        if frame_length < min_length {
            return None;
        }
        Some(Self {
            mpeg2: data[1] & 0x08 != 0,
            has_crc,
            profile: data[2] >> 6,
            sampling_index,
            channel_config: ((data[2] & 0x01) << 2) | (data[3] >> 6),
            frame_length,
            buffer_fullness: (((data[5] & 0x1F) as u16) << 6) | ((data[6] >> 2) as u16),
            raw_blocks: data[6] & 0x03,
        })
    }

    /// Sampling frequency in Hertz.
    pub fn sample_rate(&self) -> u32 {
        SAMPLING_FREQUENCIES[self.sampling_index as usize]
    }

    /// PCM samples per channel carried by the frame.
    pub fn samples(&self) -> u32 {
        (self.raw_blocks as u32 + 1) * 1024
    }

    /// Encode the header without CRC, for building streams.
    pub fn to_bytes(&self) -> [u8; HEADER_BYTES] {
        let len = self.frame_length;
        [
            0xFF,
            0xF0 | ((self.mpeg2 as u8) << 3) | (!self.has_crc as u8),
            (self.profile << 6) | (self.sampling_index << 2) | ((self.channel_config >> 2) & 0x01),
            ((self.channel_config & 0x03) << 6) | ((len >> 11) & 0x03) as u8,
            ((len >> 3) & 0xFF) as u8,
            (((len & 0x07) as u8) << 5) | ((self.buffer_fullness >> 6) & 0x1F) as u8,
            (((self.buffer_fullness & 0x3F) as u8) << 2) | (self.raw_blocks & 0x03),
        ]
    }
}

/// Per-stream resynchroniser state.
#[derive(Debug, Default)]
pub struct AdtsResync {
    frames_sent: u64,
    elapsed_us: u64,
    frame_samples: u32,
    frame_rate: u32,
    frame_left: usize,
    bridge: Vec<u8>,
    scratch: Vec<u8>,
}

impl AdtsResync {
    /// Fresh state for a new stream.
    pub fn new() -> Self {
        Self {
            bridge: Vec::with_capacity(HEADER_SCAN_BYTES),
            ..Self::default()
        }
    }

    /// Complete frames forwarded so far.
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    /// Playback time of the forwarded frames in microseconds.
    pub fn elapsed_us(&self) -> u64 {
        self.elapsed_us
    }

    /// Bytes still owed to the frame that is partially forwarded.
    pub fn frame_left(&self) -> usize {
        self.frame_left
    }

    /// Bytes held back waiting for the rest of a header.
    pub fn pending_bytes(&self) -> usize {
        self.bridge.len()
    }

    /// Forget all carried state and counters.
    pub fn reset(&mut self) {
        self.frames_sent = 0;
        self.elapsed_us = 0;
        self.frame_samples = 0;
        self.frame_rate = 0;
        self.frame_left = 0;
        self.bridge.clear();
    }

    /// Feed one chunk, forwarding every frame-aligned range it completes.
    pub fn send<F: RawForward + ?Sized>(
        &mut self,
        chunk: &[u8],
        out: &mut F,
    ) -> Result<(), AdtsError> {
        let mut pos = 0;
        if self.frame_left > 0 {
            if chunk.len() < self.frame_left {
                self.frame_left -= chunk.len();
                return forward(out, chunk);
            }
            pos = self.frame_left;
            self.frame_left = 0;
            self.record_frame();
        }

        let mut scratch = std::mem::take(&mut self.scratch);
        let data: &[u8] = if self.bridge.is_empty() {
            chunk
        } else {
            // Previous tail was never forwarded, so it joins this chunk.
            scratch.clear();
            scratch.extend_from_slice(&self.bridge);
            scratch.extend_from_slice(&chunk[pos..]);
            self.bridge.clear();
            pos = 0;
            &scratch
        };
        let result = self.scan(data, pos, out);
        self.scratch = scratch;
        result
    }

    fn scan<F: RawForward + ?Sized>(
        &mut self,
        data: &[u8],
        mut pos: usize,
        out: &mut F,
    ) -> Result<(), AdtsError> {
        let mut clean_start = 0;
        let mut in_error = false;

        while data.len() - pos >= HEADER_SCAN_BYTES {
            let Some(header) = AdtsHeader::parse(&data[pos..]) else {
                if !in_error {
                    forward(out, &data[clean_start..pos])?;
                    debug!(offset = pos, "lost ADTS sync");
                    in_error = true;
                }
                pos += 1;
                continue;
            };
            if in_error {
                debug!(offset = pos, "regained ADTS sync");
                in_error = false;
                clean_start = pos;
            }
            self.frame_samples = header.samples();
            self.frame_rate = header.sample_rate();
            let end = pos + header.frame_length;
            if end <= data.len() {
                self.record_frame();
                pos = end;
            } else {
                self.frame_left = end - data.len();
                pos = data.len();
            }
        }

        if pos < data.len() {
            self.bridge.extend_from_slice(&data[pos..]);
        }
        if !in_error {
            forward(out, &data[clean_start..pos])?;
        }
        Ok(())
    }

    fn record_frame(&mut self) {
        self.frames_sent += 1;
        if self.frame_rate > 0 {
            self.elapsed_us += self.frame_samples as u64 * 1_000_000 / self.frame_rate as u64;
        }
    }
}

fn forward<F: RawForward + ?Sized>(out: &mut F, data: &[u8]) -> Result<(), AdtsError> {
    if data.is_empty() {
        return Ok(());
    }
    let sent = out.forward(data);
    if sent != data.len() {
        return Err(AdtsError::ShortForward {
            requested: data.len(),
            sent,
        });
    }
    Ok(())
}
