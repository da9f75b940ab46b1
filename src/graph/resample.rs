use crate::{
    graph::node::{AudioNode, StreamFormat},
    MAX_BLOCK_SIZE,
};

/*
Sample-Rate Reconciliation
==========================

The mixer operates at one fixed rate. A source whose native rate differs gets
wrapped in a `Resampler` when it is added, so every channel the mixer reads
looks like it runs at the operating rate.

Linear interpolation between adjacent source frames is used. It is cheap,
allocation-free after construction, and adequate for gain-staged musical
sources; a windowed-sinc design would cut aliasing further at several times
the cost.

The adapter keeps an interleaved buffer of source frames plus a fractional
read position. Each `read`:

  1. drops the whole frames already consumed (keeping one for interpolation),
  2. pulls enough source frames to cover the requested output block,
  3. walks the output, interpolating per channel and advancing the position
     by `native_rate / target_rate` frames per output frame.

A source that returns fewer frames than requested is padded with silence, so
an exhausted source decays to silence instead of faulting.
*/

pub struct Resampler {
    source: Box<dyn AudioNode>,
    target_rate: f32,
    /// Source frames consumed per output frame.
    step: f64,
    /// Interleaved source frames awaiting consumption.
    buf: Vec<f32>,
    /// Valid frames in `buf`.
    buf_frames: usize,
    /// Fractional read position within `buf`, in frames.
    pos: f64,
}

impl Resampler {
    pub fn new(source: Box<dyn AudioNode>, target_rate: f32) -> Self {
        let native = source.format();
        let step = native.sample_rate as f64 / target_rate as f64;
        // Room for the largest output block plus the interpolation tail.
        let capacity_frames = (MAX_BLOCK_SIZE as f64 * step).ceil() as usize + 2;

        Self {
            buf: vec![0.0; capacity_frames * native.channels],
            source,
            target_rate,
            step,
            buf_frames: 0,
            pos: 0.0,
        }
    }

    /// Source frames needed in the buffer to interpolate `frames` outputs.
    fn frames_needed(&self, frames: usize) -> usize {
        (self.pos + frames as f64 * self.step).ceil() as usize + 1
    }

    fn refill(&mut self, needed: usize) {
        let channels = self.source.format().channels;

        // Drop consumed whole frames, keeping the one under `pos` so the
        // interpolation window stays valid.
        let consumed = self.pos.floor() as usize;
        if consumed > 0 {
            let keep = self.buf_frames.saturating_sub(consumed);
            self.buf
                .copy_within(consumed * channels..(consumed + keep) * channels, 0);
            self.buf_frames = keep;
            self.pos -= consumed as f64;
        }

        let capacity = self.buf.len() / channels;
        let needed = needed.min(capacity);
        if self.buf_frames >= needed {
            return;
        }

        let want = needed - self.buf_frames;
        let region = &mut self.buf[self.buf_frames * channels..(self.buf_frames + want) * channels];
        region.fill(0.0);
        let _ = self.source.read(region);
        self.buf_frames += want;
    }
}

impl AudioNode for Resampler {
    fn format(&self) -> StreamFormat {
        StreamFormat::new(self.target_rate, self.source.format().channels)
    }

    fn read(&mut self, out: &mut [f32]) -> usize {
        let channels = self.source.format().channels;
        let frames = (out.len() / channels).min(MAX_BLOCK_SIZE);

        let needed = self.frames_needed(frames);
        self.refill(needed);

        for frame in 0..frames {
            let base = self.pos.floor() as usize;
            let frac = (self.pos - base as f64) as f32;
            let next = (base + 1).min(self.buf_frames.saturating_sub(1));

            for ch in 0..channels {
                let a = self.buf[base * channels + ch];
                let b = self.buf[next * channels + ch];
                out[frame * channels + ch] = a + (b - a) * frac;
            }

            self.pos += self.step;
        }

        frames
    }

    fn is_active(&self) -> bool {
        self.source.is_active()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Ramp source: 0, 1, 2, 3, ... at its native rate.
    struct Ramp {
        rate: f32,
        next: f32,
    }

    impl AudioNode for Ramp {
        fn format(&self) -> StreamFormat {
            StreamFormat::mono(self.rate)
        }

        fn read(&mut self, out: &mut [f32]) -> usize {
            for s in out.iter_mut() {
                *s = self.next;
                self.next += 1.0;
            }
            out.len()
        }
    }

    #[test]
    fn unity_ratio_is_transparent() {
        let src = Ramp {
            rate: 48_000.0,
            next: 0.0,
        };
        let mut rs = Resampler::new(Box::new(src), 48_000.0);

        let mut buf = [0.0f32; 8];
        assert_eq!(rs.read(&mut buf), 8);
        for (i, &s) in buf.iter().enumerate() {
            assert!((s - i as f32).abs() < 1e-4, "sample {} was {}", i, s);
        }
    }

    #[test]
    fn downsampling_halves_the_ramp_rate() {
        // 96k source into a 48k target: every output advances two source
        // frames, so the ramp climbs by 2 per output sample.
        let src = Ramp {
            rate: 96_000.0,
            next: 0.0,
        };
        let mut rs = Resampler::new(Box::new(src), 48_000.0);

        let mut buf = [0.0f32; 8];
        rs.read(&mut buf);
        for i in 1..buf.len() {
            let delta = buf[i] - buf[i - 1];
            assert!((delta - 2.0).abs() < 1e-3, "delta was {}", delta);
        }
    }

    #[test]
    fn upsampling_interpolates_between_frames() {
        // 24k source into 48k: outputs advance half a source frame each.
        let src = Ramp {
            rate: 24_000.0,
            next: 0.0,
        };
        let mut rs = Resampler::new(Box::new(src), 48_000.0);

        let mut buf = [0.0f32; 8];
        rs.read(&mut buf);
        for i in 1..buf.len() {
            let delta = buf[i] - buf[i - 1];
            assert!((delta - 0.5).abs() < 1e-3, "delta was {}", delta);
        }
    }

    #[test]
    fn streaming_is_continuous_across_reads() {
        let src = Ramp {
            rate: 96_000.0,
            next: 0.0,
        };
        let mut rs = Resampler::new(Box::new(src), 48_000.0);

        let mut first = [0.0f32; 4];
        let mut second = [0.0f32; 4];
        rs.read(&mut first);
        rs.read(&mut second);

        let delta = second[0] - first[3];
        assert!((delta - 2.0).abs() < 1e-3, "seam delta was {}", delta);
    }

    #[test]
    fn reports_target_format() {
        let src = Ramp {
            rate: 44_100.0,
            next: 0.0,
        };
        let rs = Resampler::new(Box::new(src), 48_000.0);
        assert_eq!(rs.format().sample_rate, 48_000.0);
        assert_eq!(rs.format().channels, 1);
    }
}
