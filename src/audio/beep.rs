use std::f32::consts::PI;
use std::time::Duration;

/// Short mono sine tone with a linear fade-out, like a checkout scanner beep.
pub struct Beep {
    freq: f32,
    sample_rate: u32,
    num_sample: u32,
    total_samples: u32,
}

impl Beep {
    pub fn new(freq: f32, duration: Duration) -> Self {
        let sample_rate = 44100;
        Self {
            freq,
            sample_rate,
            num_sample: 0,
            total_samples: (duration.as_secs_f32() * sample_rate as f32) as u32,
        }
    }

    pub fn scanner() -> Self {
        Self::new(1800.0, Duration::from_millis(120))
    }
}

impl Iterator for Beep {
    type Item = f32;

    fn next(&mut self) -> Option<Self::Item> {
        if self.num_sample >= self.total_samples {
            return None;
        }
        let t = self.num_sample as f32 / self.sample_rate as f32;
        let envelope = 1.0 - self.num_sample as f32 / self.total_samples as f32;
        self.num_sample += 1;

        Some((2.0 * PI * self.freq * t).sin() * envelope * 0.3)
    }
}

#[cfg(feature = "sound")]
impl rodio::Source for Beep {
    fn current_frame_len(&self) -> Option<usize> {
        Some((self.total_samples - self.num_sample) as usize)
    }

    fn channels(&self) -> u16 {
        1
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        Some(Duration::from_secs_f32(
            self.total_samples as f32 / self.sample_rate as f32,
        ))
    }
}
