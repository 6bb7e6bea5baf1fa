//! Radix-2 FFT and FFT-based convolution of sampled densities.

use std::f64::consts::PI;
use std::ops::{Add, Mul, Sub};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Complex {
    pub re: f64,
    pub im: f64,
}

impl Complex {
    pub const fn new(re: f64, im: f64) -> Self {
        Self { re, im }
    }
}

impl Add for Complex {
    type Output = Complex;

    fn add(self, rhs: Complex) -> Complex {
        Complex::new(self.re + rhs.re, self.im + rhs.im)
    }
}

impl Sub for Complex {
    type Output = Complex;

    fn sub(self, rhs: Complex) -> Complex {
        Complex::new(self.re - rhs.re, self.im - rhs.im)
    }
}

impl Mul for Complex {
    type Output = Complex;

    fn mul(self, rhs: Complex) -> Complex {
        Complex::new(
            self.re * rhs.re - self.im * rhs.im,
            self.re * rhs.im + self.im * rhs.re,
        )
    }
}

/// In-place iterative Cooley-Tukey transform.
///
/// `data.len()` must be a power of two. The inverse transform is scaled by
/// `1 / n`.
fn fft_in_place(data: &mut [Complex], inverse: bool) {
    let n = data.len();
    debug_assert!(n.is_power_of_two(), "fft length {n} is not a power of two");
    if n <= 1 {
        return;
    }

    let mut j = 0;
    for i in 1..n {
        let mut bit = n >> 1;
        while j & bit != 0 {
            j ^= bit;
            bit >>= 1;
        }
        j |= bit;
        if i < j {
            data.swap(i, j);
        }
    }

    let sign = if inverse { 1.0 } else { -1.0 };
    let mut len = 2;
    while len <= n {
        let angle = sign * 2.0 * PI / len as f64;
        let step = Complex::new(angle.cos(), angle.sin());
        for start in (0..n).step_by(len) {
            let mut w = Complex::new(1.0, 0.0);
            for k in 0..len / 2 {
                let even = data[start + k];
                let odd = data[start + k + len / 2] * w;
                data[start + k] = even + odd;
                data[start + k + len / 2] = even - odd;
                w = w * step;
            }
        }
        len <<= 1;
    }

    if inverse {
        let scale = 1.0 / n as f64;
        for value in data.iter_mut() {
            value.re *= scale;
            value.im *= scale;
        }
    }
}

/// Discrete linear convolution of all `signals`, truncated to the length of
/// the first one.
///
/// Signals are folded in pairwise. Each step zero-pads both operands to at
/// least twice the retained length, so the circular product equals the
/// linear one on the retained prefix, and truncates before the next step.
pub fn convolve_all(signals: &[Vec<f64>]) -> Vec<f64> {
    let Some((first, rest)) = signals.split_first() else {
        return Vec::new();
    };
    let keep = first.len();
    let size = (2 * keep).next_power_of_two();

    let mut acc = first.clone();
    for signal in rest {
        let mut left = spectrum(&acc, size);
        let right = spectrum(signal, size);
        for (a, b) in left.iter_mut().zip(right) {
            *a = *a * b;
        }
        fft_in_place(&mut left, true);
        acc = left.into_iter().take(keep).map(|value| value.re).collect();
    }
    acc
}

/// Forward transform of the first `size` samples of `signal`, zero-padded.
fn spectrum(signal: &[f64], size: usize) -> Vec<Complex> {
    let mut data = vec![Complex::default(); size];
    for (slot, value) in data.iter_mut().zip(signal) {
        slot.re = *value;
    }
    fft_in_place(&mut data, false);
    data
}
