//! Streaming decoder for the packed sample format.
//!
//! One byte per sample in the common case: 3-bit signed deltas for
//! temperature and humidity, a 7-bit signed delta for pressure. Bytes with
//! the top nibble all-ones are escapes carrying stream metadata; `0xFF` is
//! end of stream, which is what unwritten flash reads as.

use crate::time::Timestamp;

/// Where the decoder pulls bytes from: a drained buffer, flash itself, or
/// RTC retention memory. Offsets at or beyond the end of written data must
/// read as `0xFF` so the decoder sees end-of-stream.
pub trait ByteSource {
    fn read_byte(&mut self, offset: usize) -> u8;
}

impl ByteSource for &[u8] {
    fn read_byte(&mut self, offset: usize) -> u8 {
        self.get(offset).copied().unwrap_or(0xFF)
    }
}

/// One decoded reading. Channel validity follows the stream type in force
/// when the sample was decoded.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Sample {
    pub timestamp: Timestamp,
    pub has_climate: bool,
    pub temperature: i32,
    pub humidity: i32,
    pub has_pressure: bool,
    pub pressure: i32,
}

/// Receives decoded samples and mark events. Marks are rare; the default
/// implementation drops them.
pub trait SampleSink {
    fn on_sample(&mut self, sample: &Sample);

    fn on_mark(&mut self, _timestamp: &Timestamp, _mark: u8) {}
}

/// Which channels the following samples carry, as selected by the low two
/// bits of a time-signature escape.
#[derive(strum::FromRepr, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum StreamType {
    None = 0,
    Climate = 1,
    Pressure = 2,
    Both = 3,
}

impl StreamType {
    pub fn has_climate(self) -> bool {
        self as u8 & 0x01 != 0
    }

    pub fn has_pressure(self) -> bool {
        self as u8 & 0x02 != 0
    }
}

/// Why a decode run stopped. Only `EndOfStream` is the regular case; the
/// other two abandon the rest of the stream but keep everything already
/// emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StopReason {
    EndOfStream,
    MissingStreamType,
    InvalidEscape(u8),
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DecodeSummary {
    pub samples: u32,
    pub stop: StopReason,
}

/// Rolling state of one decode session. Compression restarts on every
/// record, so a `Decoder` is built fresh per stream and consumed by
/// [`run`](Self::run); state is never shared across streams.
pub struct Decoder {
    stream_type: StreamType,
    last_temperature: i32,
    last_humidity: i32,
    last_pressure: i32,
    period: u32,
    timestamp: Timestamp,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder {
    /// Defaults: no stream type, one sample per minute, no time fix.
    pub fn new() -> Self {
        Self {
            stream_type: StreamType::None,
            last_temperature: 0,
            last_humidity: 0,
            last_pressure: 0,
            period: 60,
            timestamp: Timestamp::invalid(),
        }
    }

    /// Decodes from `source` until end of stream or an abort condition,
    /// emitting every sample and mark through `sink`.
    pub fn run<S: ByteSource, K: SampleSink>(
        mut self,
        source: &mut S,
        sink: &mut K,
    ) -> DecodeSummary {
        let mut samples = 0u32;
        let mut i = 0usize;
        loop {
            let c = source.read_byte(i);
            i += 1;
            if c & 0xF0 == 0xF0 {
                if c == 0xFF {
                    return DecodeSummary {
                        samples,
                        stop: StopReason::EndOfStream,
                    };
                }
                match c & 0x0F {
                    0..=3 => {
                        self.stream_type =
                            StreamType::from_repr(c & 0x03).unwrap_or(StreamType::None);
                        i += self.read_time_signature(source, i);
                    }
                    4 => {
                        let hi = source.read_byte(i);
                        let lo = source.read_byte(i + 1);
                        i += 2;
                        self.period = u32::from(u16::from_be_bytes([hi, lo]));
                    }
                    5 => {
                        // comment, informational only
                        loop {
                            let ch = source.read_byte(i);
                            i += 1;
                            if ch == 0x00 || ch == 0xFF {
                                break;
                            }
                        }
                    }
                    6 => {
                        let mark = source.read_byte(i);
                        i += 1;
                        sink.on_mark(&self.timestamp, mark);
                    }
                    7 => {} // padding
                    8 => {
                        let count = source.read_byte(i);
                        i += 1;
                        if self.stream_type == StreamType::None {
                            return DecodeSummary {
                                samples,
                                stop: StopReason::MissingStreamType,
                            };
                        }
                        for _ in 0..count {
                            samples += 1;
                            self.emit(sink);
                        }
                    }
                    _ => {
                        return DecodeSummary {
                            samples,
                            stop: StopReason::InvalidEscape(c),
                        };
                    }
                }
            } else {
                if self.stream_type == StreamType::None {
                    return DecodeSummary {
                        samples,
                        stop: StopReason::MissingStreamType,
                    };
                }
                samples += 1;
                i += self.read_sample(c, source, i);
                self.emit(sink);
            }
        }
    }

    /// Time signature: year(+2000), then month/day/hour/minute packed into
    /// three bytes, optionally followed by seconds. A year byte of `0xFF`
    /// means no fix is known and nothing further follows.
    fn read_time_signature<S: ByteSource>(&mut self, source: &mut S, i: usize) -> usize {
        let mut b = [0u8; 5];
        for (j, slot) in b.iter_mut().enumerate() {
            *slot = source.read_byte(i + j);
        }
        if b[0] == 0xFF {
            self.timestamp.valid = false;
            return 1;
        }
        let seconds_omitted = b[3] & 0x0F == 0x0F;
        self.timestamp.valid = true;
        self.timestamp.year = b[0] as u16 + 2000;
        self.timestamp.month = b[1] >> 4;
        self.timestamp.day = ((b[1] & 0x0F) << 1) | ((b[2] >> 7) & 1);
        self.timestamp.hour = (b[2] >> 2) & 0x1F;
        self.timestamp.minute = ((b[2] & 0x03) << 4) | (b[3] >> 4);
        if seconds_omitted {
            4
        } else {
            self.timestamp.second = b[4] & 0x3F;
            5
        }
    }

    /// Decodes one sample introduced by byte `c`, returning how many extra
    /// bytes were consumed. Bit 7 selects delta against the previous values
    /// (clear) or absolute fields (set).
    fn read_sample<S: ByteSource>(&mut self, c: u8, source: &mut S, i: usize) -> usize {
        let mut c = c;
        let mut consumed = 0;
        if c & 0x80 == 0 {
            let mut skip = false;
            if self.stream_type.has_climate() {
                let mut d = i32::from(c & 0x07);
                if d & 0x04 != 0 {
                    d -= 8;
                }
                self.last_temperature += d;
                let mut d = i32::from((c >> 4) & 0x07);
                if d & 0x04 != 0 {
                    d -= 8;
                }
                self.last_humidity += d;
                // bit 3: pressure unchanged, no pressure byte follows
                skip = c & 0x08 != 0;
                if self.stream_type.has_pressure() && !skip {
                    c = source.read_byte(i + consumed);
                    consumed += 1;
                }
            }
            if self.stream_type.has_pressure() && !skip {
                let mut d = i32::from(c);
                if d & 0x40 != 0 {
                    d -= 128;
                }
                self.last_pressure += d;
            }
        } else {
            if self.stream_type.has_climate() {
                self.last_humidity = i32::from(c & 0x7F);
                self.last_temperature = i32::from(source.read_byte(i + consumed) as i8);
                consumed += 1;
                if self.stream_type.has_pressure() {
                    c = source.read_byte(i + consumed);
                    consumed += 1;
                }
            }
            if self.stream_type.has_pressure() {
                let lsb = source.read_byte(i + consumed);
                consumed += 1;
                self.last_pressure = (i32::from(c & 0x7F) << 8) | i32::from(lsb);
            }
        }
        consumed
    }

    fn emit<K: SampleSink>(&mut self, sink: &mut K) {
        sink.on_sample(&Sample {
            timestamp: self.timestamp,
            has_climate: self.stream_type.has_climate(),
            temperature: self.last_temperature,
            humidity: self.last_humidity,
            has_pressure: self.stream_type.has_pressure(),
            pressure: self.last_pressure,
        });
        self.timestamp.advance(self.period);
    }
}
