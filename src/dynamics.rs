use crate::config::CompressorSettings;

/// Feed-forward peak compressor with a soft knee, modeled on the WebAudio
/// DynamicsCompressor parameters. Channels share one detector so the stereo
/// image does not shift under gain reduction.
#[derive(Debug, Clone)]
pub struct Compressor {
    settings: CompressorSettings,
    attack_coeff: f32,
    release_coeff: f32,
    envelope_db: f32, // current gain reduction, <= 0
}

impl Compressor {
    pub fn new(settings: CompressorSettings, sample_rate: f32) -> Self {
        Compressor {
            attack_coeff: Self::coeff(settings.attack, sample_rate),
            release_coeff: Self::coeff(settings.release, sample_rate),
            settings,
            envelope_db: 0.0,
        }
    }

    fn coeff(time: f32, sample_rate: f32) -> f32 {
        (-1.0 / (time * sample_rate)).exp()
    }

    /// Static curve: gain change in dB for an input level in dB.
    pub fn gain_reduction_db(&self, level_db: f32) -> f32 {
        let s = &self.settings;
        let slope = 1.0 / s.ratio - 1.0;
        let over = level_db - s.threshold_db;

        if s.knee_db > 0.0 && 2.0 * over.abs() <= s.knee_db {
            let x = over + s.knee_db / 2.0;
            slope * x * x / (2.0 * s.knee_db)
        } else if over > 0.0 {
            slope * over
        } else {
            0.0
        }
    }

    /// Process one interleaved frame in place.
    #[inline]
    pub fn process_frame(&mut self, frame: &mut [f32]) {
        let peak = frame.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        let level_db = 20.0 * peak.max(1e-9).log10();
        let target = self.gain_reduction_db(level_db);

        // Falling target means more reduction: attack. Rising: release.
        let coeff = if target < self.envelope_db { self.attack_coeff } else { self.release_coeff };
        self.envelope_db = target + (self.envelope_db - target) * coeff;

        let gain = 10f32.powf(self.envelope_db / 20.0);
        for sample in frame.iter_mut() {
            *sample *= gain;
        }
    }

    /// Current gain reduction in dB (0 when idle).
    pub fn reduction_db(&self) -> f32 {
        self.envelope_db
    }

    pub fn reset(&mut self) {
        self.envelope_db = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compressor() -> Compressor {
        Compressor::new(CompressorSettings::default(), 44_100.0)
    }

    #[test]
    fn quiet_signal_passes_untouched() {
        let mut comp = compressor();
        for _ in 0..1000 {
            let mut frame = [0.01, -0.01];
            comp.process_frame(&mut frame);
            assert!((frame[0] - 0.01).abs() < 1e-5);
        }
        assert_eq!(comp.reduction_db(), 0.0);
    }

    #[test]
    fn static_curve_above_knee_follows_ratio() {
        let comp = compressor();
        // 24 dB over threshold, well past the 15 dB half knee
        let reduction = comp.gain_reduction_db(0.0);
        assert!((reduction - (1.0 / 12.0 - 1.0) * 24.0).abs() < 1e-4);
        assert_eq!(comp.gain_reduction_db(-60.0), 0.0);
    }

    #[test]
    fn knee_is_continuous() {
        let comp = compressor();
        let edge = -24.0 + 15.0;
        let inside = comp.gain_reduction_db(edge - 1e-3);
        let outside = comp.gain_reduction_db(edge + 1e-3);
        assert!((inside - outside).abs() < 1e-2);
    }

    #[test]
    fn loud_overlap_is_pulled_below_clipping() {
        let mut comp = compressor();
        // 100 ms of a summed signal at 1.6 (several voices stacked)
        let out = (0..4410)
            .map(|_| {
                let mut frame = [1.6, 1.6];
                comp.process_frame(&mut frame);
                frame[0]
            })
            .last()
            .unwrap();
        assert!(out < 1.0, "compressed output {} should not clip", out);
        assert!(comp.reduction_db() < -10.0);
    }

    #[test]
    fn releases_after_signal_stops() {
        let mut comp = compressor();
        for _ in 0..4410 {
            comp.process_frame(&mut [1.0, 1.0]);
        }
        // one second of silence is four release constants
        for _ in 0..44_100 {
            comp.process_frame(&mut [0.0, 0.0]);
        }
        assert!(comp.reduction_db() > -0.5);
    }
}
