//! Background/foreground classification of single pixels.

use imageproc::image::Rgb;

use crate::config::ClassifierTunables;

/// Tone of the page background a scan or strip was drawn on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Tone {
    #[default]
    Light,
    Dark,
}

impl Tone {
    /// The pure colour used to paint over background areas.
    pub fn fill(self) -> Rgb<u8> {
        match self {
            Tone::Light => Rgb([255, 255, 255]),
            Tone::Dark => Rgb([0, 0, 0]),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelClass {
    White,
    Black,
    Grey,
    Other,
}

/// Classifies pixels under configurable tolerances.
///
/// The class matching the background tone is detected with the "quite"
/// tolerance, the opposite extreme only when it is exact. A scan of a white
/// page therefore reads JPEG-noisy white as `White` while dark-grey ink still
/// reads as `Grey`, and symmetrically for black pages.
#[derive(Debug, Clone, Copy, Default)]
pub struct Classifier {
    tunables: ClassifierTunables,
}

impl Classifier {
    pub fn new(tunables: ClassifierTunables) -> Self {
        Self { tunables }
    }

    pub fn classify(&self, pixel: Rgb<u8>, background: Tone) -> PixelClass {
        let [r, g, b] = pixel.0;
        let quite = self.tunables.quite_tolerance;
        let (white_tol, black_tol) = match background {
            Tone::Light => (quite, 0),
            Tone::Dark => (0, quite),
        };

        let lo = r.min(g).min(b);
        let hi = r.max(g).max(b);

        if lo >= 255 - white_tol {
            PixelClass::White
        } else if hi <= black_tol {
            PixelClass::Black
        } else if hi - lo <= self.tunables.grey_tolerance {
            PixelClass::Grey
        } else {
            PixelClass::Other
        }
    }

    #[inline]
    pub fn is_background(&self, pixel: Rgb<u8>, background: Tone) -> bool {
        matches!(
            (self.classify(pixel, background), background),
            (PixelClass::White, Tone::Light) | (PixelClass::Black, Tone::Dark)
        )
    }

    /// Tone implied by a colour sampled from the page, usually the dominant one.
    pub fn tone_of(&self, pixel: Rgb<u8>) -> Tone {
        if self.classify(pixel, Tone::Dark) == PixelClass::Black {
            Tone::Dark
        } else {
            Tone::Light
        }
    }
}
