use glam::{Quat, Vec3};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum TrackError {
    #[error("track has no samples")]
    Empty,
    #[error("timestamps not strictly increasing at sample {index} ({prev} -> {next})")]
    NonMonotonic { index: usize, prev: f32, next: f32 },
}

/// Values a track knows how to interpolate between two samples
pub trait Keyframe: Copy {
    fn interpolate(self, next: Self, factor: f32) -> Self;
}

impl Keyframe for Vec3 {
    #[inline]
    fn interpolate(self, next: Vec3, factor: f32) -> Vec3 {
        self.lerp(next, factor)
    }
}

impl Keyframe for Quat {
    #[inline]
    fn interpolate(self, next: Quat, factor: f32) -> Quat {
        // slerp drifts off unit length
        self.slerp(next, factor).normalize()
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sample<T> {
    /// clip ticks, not seconds
    pub time: f32,
    pub value: T,
}

/// Time-stamped samples for one bone channel. Never empty, timestamps strictly increasing.
#[derive(Clone, Debug)]
pub struct KeyframeTrack<T: Keyframe> {
    samples: Box<[Sample<T>]>,
}

impl<T: Keyframe> KeyframeTrack<T> {
    pub fn new(samples: Vec<Sample<T>>) -> Result<Self, TrackError> {
        if samples.is_empty() {
            return Err(TrackError::Empty);
        }
        for (i, pair) in samples.windows(2).enumerate() {
            // negated so NaN timestamps are rejected too
            if !(pair[1].time > pair[0].time) {
                return Err(TrackError::NonMonotonic {
                    index: i + 1,
                    prev: pair[0].time,
                    next: pair[1].time,
                });
            }
        }
        Ok(Self {
            samples: samples.into_boxed_slice(),
        })
    }

    pub fn from_pairs(keys: impl IntoIterator<Item = (f32, T)>) -> Result<Self, TrackError> {
        Self::new(
            keys.into_iter()
                .map(|(time, value)| Sample { time, value })
                .collect(),
        )
    }

    pub fn constant(value: T) -> Self {
        Self {
            samples: Box::new([Sample { time: 0.0, value }]),
        }
    }

    pub fn samples(&self) -> &[Sample<T>] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Index of the segment containing `time` and the interpolation factor inside it.
    /// None for single-sample tracks. Times outside the keyed range clamp to the end samples.
    pub fn segment(&self, time: f32) -> Option<(usize, f32)> {
        let n = self.samples.len();
        if n == 1 {
            return None;
        }
        let index = (0..n - 1)
            .find(|&i| time < self.samples[i + 1].time)
            .unwrap_or(n - 2);
        let (t0, t1) = (self.samples[index].time, self.samples[index + 1].time);
        let factor = (time - t0) / (t1 - t0);
        let factor = if factor.is_nan() { 0.0 } else { factor.clamp(0.0, 1.0) };
        Some((index, factor))
    }

    pub fn sample(&self, time: f32) -> T {
        match self.segment(time) {
            None => self.samples[0].value,
            Some((i, factor)) => self.samples[i]
                .value
                .interpolate(self.samples[i + 1].value, factor),
        }
    }
}

impl KeyframeTrack<Quat> {
    /// Rotation keys as imported are not guaranteed to be unit length
    pub fn normalized(mut self) -> Self {
        for sample in self.samples.iter_mut() {
            sample.value = sample.value.normalize();
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp() -> KeyframeTrack<Vec3> {
        KeyframeTrack::from_pairs([
            (0.0, Vec3::ZERO),
            (10.0, Vec3::new(1.0, 0.0, 0.0)),
            (20.0, Vec3::new(1.0, 2.0, 0.0)),
        ])
        .unwrap()
    }

    #[test]
    fn single_sample_is_constant_everywhere() {
        let track = KeyframeTrack::constant(Vec3::new(3.0, 2.0, 1.0));
        for t in [-1.0e6, -1.0, 0.0, 0.5, 1.0e9] {
            assert_eq!(track.sample(t), Vec3::new(3.0, 2.0, 1.0));
        }
        assert!(track.segment(4.0).is_none());
    }

    #[test]
    fn interpolates_inside_segment() {
        let track = ramp();
        assert!(track.sample(5.0).abs_diff_eq(Vec3::new(0.5, 0.0, 0.0), 1e-6));
        assert!(track.sample(15.0).abs_diff_eq(Vec3::new(1.0, 1.0, 0.0), 1e-6));
        assert_eq!(track.segment(15.0).map(|(i, _)| i), Some(1));
    }

    #[test]
    fn factor_stays_in_unit_range() {
        let track = ramp();
        let mut t = -5.0;
        while t < 25.0 {
            let (_, factor) = track.segment(t).unwrap();
            assert!((0.0..=1.0).contains(&factor), "factor {} at t={}", factor, t);
            t += 0.37;
        }
    }

    #[test]
    fn continuous_at_segment_boundary() {
        let track = ramp();
        let at_key = Vec3::new(1.0, 0.0, 0.0);
        for eps in [1e-1, 1e-2, 1e-3] {
            let before = track.sample(10.0 - eps);
            assert!(before.distance(at_key) <= eps / 10.0 + 1e-5);
        }
        assert!(track.sample(10.0).abs_diff_eq(at_key, 1e-6));
    }

    #[test]
    fn clamps_outside_keyed_range() {
        let track = ramp();
        assert_eq!(track.sample(-3.0), Vec3::ZERO);
        assert_eq!(track.sample(20.0), Vec3::new(1.0, 2.0, 0.0));
        assert_eq!(track.sample(400.0), Vec3::new(1.0, 2.0, 0.0));
    }

    #[test]
    fn rejects_bad_timestamps() {
        assert_eq!(KeyframeTrack::<Vec3>::new(vec![]).unwrap_err(), TrackError::Empty);
        let err =
            KeyframeTrack::from_pairs([(0.0, Vec3::ZERO), (2.0, Vec3::ONE), (2.0, Vec3::ZERO)])
                .unwrap_err();
        assert_eq!(err, TrackError::NonMonotonic { index: 2, prev: 2.0, next: 2.0 });
        assert!(KeyframeTrack::from_pairs([(1.0, Vec3::ZERO), (f32::NAN, Vec3::ONE)]).is_err());
    }

    #[test]
    fn rotation_output_is_unit_length() {
        let track = KeyframeTrack::from_pairs([
            (0.0, Quat::IDENTITY),
            (1.0, Quat::from_rotation_y(2.5)),
            (2.0, Quat::from_euler(glam::EulerRot::XYZ, 0.3, -1.2, 2.9)),
        ])
        .unwrap();
        let mut t = 0.0;
        while t <= 2.0 {
            assert!((track.sample(t).length() - 1.0).abs() < 1e-5);
            t += 0.05;
        }
    }

    #[test]
    fn normalizes_imported_rotations() {
        let track = KeyframeTrack::constant(Quat::from_xyzw(0.0, 0.0, 0.0, 2.0)).normalized();
        assert!(track.sample(0.0).abs_diff_eq(Quat::IDENTITY, 1e-6));
    }
}
