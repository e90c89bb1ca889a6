//! Builds the packed byte stream the decoder consumes. Every record stored
//! in the log is self-contained, so one `Encoder` session corresponds to one
//! record: start fresh, emit a time signature, then samples and metadata,
//! then hand [`finish`](Encoder::finish) to `write_record`.

use crate::decode::StreamType;
use crate::error::Error;
use crate::time::Timestamp;
use alloc::vec::Vec;

/// Rolling encoder state mirroring the decoder: delta samples are emitted
/// against the previously encoded values whenever the deltas fit their
/// 3-bit (climate) and 7-bit (pressure) fields.
pub struct Encoder {
    stream_type: StreamType,
    last_temperature: i32,
    last_humidity: i32,
    last_pressure: i32,
    force_full: bool,
    buf: Vec<u8>,
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder {
    pub fn new() -> Self {
        Self {
            stream_type: StreamType::None,
            last_temperature: 0,
            last_humidity: 0,
            last_pressure: 0,
            force_full: true,
            buf: Vec::new(),
        }
    }

    /// Bytes emitted so far. Records hold at most 255 bytes; check before
    /// adding more samples and start a new record when close to the limit.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }

    /// Emits a time signature selecting `stream_type` for the samples that
    /// follow. An invalid timestamp encodes as "no fix known". Changing the
    /// stream type forces the next sample to be a full one.
    pub fn time_signature(&mut self, timestamp: &Timestamp, stream_type: StreamType) {
        if stream_type != self.stream_type {
            self.force_full = true;
        }
        self.stream_type = stream_type;
        self.buf.push(0xF0 | stream_type as u8);
        if !timestamp.valid {
            self.buf.push(0xFF);
            return;
        }
        let year = timestamp.year.saturating_sub(2000).min(254) as u8;
        self.buf.push(year);
        self.buf
            .push((timestamp.month << 4) | ((timestamp.day >> 1) & 0x0F));
        self.buf.push(
            ((timestamp.day & 0x01) << 7) | ((timestamp.hour & 0x1F) << 2) | (timestamp.minute >> 4),
        );
        // low nibble zero: the seconds byte follows
        self.buf.push((timestamp.minute & 0x0F) << 4);
        self.buf.push(timestamp.second & 0x3F);
    }

    /// Sampling period in seconds for the samples that follow (default 60).
    pub fn set_period(&mut self, seconds: u16) {
        self.buf.push(0xF4);
        self.buf.extend_from_slice(&seconds.to_be_bytes());
    }

    /// Free-text annotation, skipped by the decoder. The terminator values
    /// cannot appear inside a comment and are dropped from `text`.
    pub fn comment(&mut self, text: &str) {
        self.buf.push(0xF5);
        self.buf
            .extend(text.bytes().filter(|&b| b != 0x00 && b != 0xFF));
        self.buf.push(0x00);
    }

    /// User-inserted mark event, delivered through the mark sink with the
    /// timestamp current at decode time.
    pub fn mark(&mut self, value: u8) {
        self.buf.push(0xF6);
        self.buf.push(value);
    }

    /// No-op padding byte.
    pub fn pad(&mut self) {
        self.buf.push(0xF7);
    }

    /// The previous sample values repeated `count` more times, each one
    /// period apart. The wire count is 1..=255, so a zero count encodes
    /// nothing.
    pub fn repeat(&mut self, count: u8) -> Result<(), Error> {
        if self.stream_type == StreamType::None {
            return Err(Error::StreamTypeNotSet);
        }
        if count == 0 {
            return Ok(());
        }
        self.buf.push(0xF8);
        self.buf.push(count);
        Ok(())
    }

    /// Encodes one sample. Values for disabled channels are ignored.
    ///
    /// Delta form is used when every enabled delta fits; otherwise the full
    /// form spells the values out. The first sample after a stream-type
    /// change is always full so the decoder never applies a delta to stale
    /// state.
    pub fn sample(&mut self, temperature: i32, humidity: i32, pressure: i32) -> Result<(), Error> {
        let st = self.stream_type;
        if st == StreamType::None {
            return Err(Error::StreamTypeNotSet);
        }
        if st.has_climate()
            && (!(0..=100).contains(&humidity) || !(-128..=127).contains(&temperature))
        {
            return Err(Error::SampleOutOfRange);
        }
        if st.has_pressure() && !(0..=0x7FFF).contains(&pressure) {
            return Err(Error::SampleOutOfRange);
        }
        // a pressure-only full sample puts the pressure MSB in its lead
        // byte; values from 0x7000 up would collide with the escape range
        if st == StreamType::Pressure && pressure >= 0x7000 {
            return Err(Error::SampleOutOfRange);
        }

        let dt = temperature - self.last_temperature;
        let dh = humidity - self.last_humidity;
        let dp = pressure - self.last_pressure;
        let climate_fits = (-4..=3).contains(&dt) && (-4..=3).contains(&dh);
        let pressure_fits = (-64..=63).contains(&dp);
        let delta_ok = !self.force_full
            && (!st.has_climate() || climate_fits)
            && (!st.has_pressure() || pressure_fits);

        if delta_ok {
            match st {
                StreamType::Climate => {
                    self.buf
                        .push((((dh as u8) & 0x07) << 4) | ((dt as u8) & 0x07));
                }
                StreamType::Pressure => {
                    self.buf.push((dp as u8) & 0x7F);
                }
                StreamType::Both => {
                    let mut lead = (((dh as u8) & 0x07) << 4) | ((dt as u8) & 0x07);
                    if dp == 0 {
                        lead |= 0x08; // pressure unchanged, no pressure byte
                        self.buf.push(lead);
                    } else {
                        self.buf.push(lead);
                        self.buf.push((dp as u8) & 0x7F);
                    }
                }
                StreamType::None => unreachable!(),
            }
        } else {
            if st.has_climate() {
                self.buf.push(0x80 | (humidity as u8));
                self.buf.push(temperature as i8 as u8);
                if st.has_pressure() {
                    self.buf.push(((pressure >> 8) as u8) & 0x7F);
                    self.buf.push(pressure as u8);
                }
            } else {
                self.buf.push(0x80 | (((pressure >> 8) as u8) & 0x7F));
                self.buf.push(pressure as u8);
            }
        }

        if st.has_climate() {
            self.last_temperature = temperature;
            self.last_humidity = humidity;
        }
        if st.has_pressure() {
            self.last_pressure = pressure;
        }
        self.force_full = false;
        Ok(())
    }
}
