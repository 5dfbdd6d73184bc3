//! Complex sample value type and its text codec.
//!
//! A sample is written as two space-separated decimal numbers, real part
//! first: `"0.5 -1.25"`. Rust float formatting and parsing never consult the
//! process locale, so the decimal point is always `.`.

use std::fmt;

use num_complex::Complex64;
use serde::{Deserialize, Serialize};

/// One complex-valued signal sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ComplexSample {
    /// Real (in-phase) component
    pub re: f64,
    /// Imaginary (quadrature) component
    pub im: f64,
}

impl ComplexSample {
    /// The value returned for text that cannot be parsed.
    pub const ZERO: Self = Self { re: 0.0, im: 0.0 };

    /// Create a sample from its components.
    #[must_use]
    pub const fn new(re: f64, im: f64) -> Self {
        Self { re, im }
    }

    /// Parse `"<real> <imag>"`, falling back to [`ComplexSample::ZERO`].
    ///
    /// The fallback is lossy on purpose: a single corrupt record must not
    /// abort ingestion of the file around it. Use [`ComplexSample::try_parse`]
    /// when malformed input has to be detected.
    ///
    /// ```
    /// use usrp_io::ComplexSample;
    ///
    /// assert_eq!(ComplexSample::parse("1.5 -2"), ComplexSample::new(1.5, -2.0));
    /// assert_eq!(ComplexSample::parse("1.0 2.0 3.0"), ComplexSample::ZERO);
    /// ```
    #[must_use]
    pub fn parse(text: &str) -> Self {
        match Self::try_parse(text) {
            Some(sample) => sample,
            None => Self::ZERO,
        }
    }

    /// Parse `"<real> <imag>"`, returning `None` on wrong token count or a
    /// non-numeric token.
    #[must_use]
    pub fn try_parse(text: &str) -> Option<Self> {
        let mut tokens = text.split_whitespace();
        let (re, im) = match (tokens.next(), tokens.next(), tokens.next()) {
            (Some(re), Some(im), None) => (re, im),
            _ => return None,
        };

        Some(Self {
            re: re.parse().ok()?,
            im: im.parse().ok()?,
        })
    }
}

impl fmt::Display for ComplexSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.re, self.im)
    }
}

impl From<Complex64> for ComplexSample {
    fn from(value: Complex64) -> Self {
        Self::new(value.re, value.im)
    }
}

impl From<ComplexSample> for Complex64 {
    fn from(value: ComplexSample) -> Self {
        Complex64::new(value.re, value.im)
    }
}
