use imageproc::image::Rgb;
use serde::{Deserialize, Serialize};
use strum::{EnumCount, EnumIter};

use std::str::FromStr;

use crate::error::Error;

/// Container an e-reader opens best.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArchiveKind {
    Cbz,
    Pdf,
}

impl ArchiveKind {
    pub fn extension(self) -> &'static str {
        match self {
            ArchiveKind::Cbz => "cbz",
            ArchiveKind::Pdf => "pdf",
        }
    }
}

impl FromStr for ArchiveKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cbz" => Ok(ArchiveKind::Cbz),
            "pdf" => Ok(ArchiveKind::Pdf),
            _ => Err(Error::Config(format!("unknown archive kind: {s}"))),
        }
    }
}

const fn grey(level: u8) -> Rgb<u8> {
    Rgb([level, level, level])
}

const PALETTE_4: &[Rgb<u8>] = &[grey(0x00), grey(0x55), grey(0xaa), grey(0xff)];

const PALETTE_15A: &[Rgb<u8>] = &[
    grey(0x00),
    grey(0x11),
    grey(0x22),
    grey(0x33),
    grey(0x44),
    grey(0x55),
    grey(0x66),
    grey(0x77),
    grey(0x88),
    grey(0x99),
    grey(0xaa),
    grey(0xbb),
    grey(0xcc),
    grey(0xdd),
    grey(0xff),
];

const PALETTE_15B: &[Rgb<u8>] = &[
    grey(0x00),
    grey(0x11),
    grey(0x22),
    grey(0x33),
    grey(0x44),
    grey(0x55),
    grey(0x77),
    grey(0x88),
    grey(0x99),
    grey(0xaa),
    grey(0xbb),
    grey(0xcc),
    grey(0xdd),
    grey(0xee),
    grey(0xff),
];

const PALETTE_16: &[Rgb<u8>] = &[
    grey(0x00),
    grey(0x11),
    grey(0x22),
    grey(0x33),
    grey(0x44),
    grey(0x55),
    grey(0x66),
    grey(0x77),
    grey(0x88),
    grey(0x99),
    grey(0xaa),
    grey(0xbb),
    grey(0xcc),
    grey(0xdd),
    grey(0xee),
    grey(0xff),
];

/// Target resolution, grey palette and preferred container of one e-reader.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceProfile {
    name: &'static str,
    width: u32,
    height: u32,
    palette: &'static [Rgb<u8>],
    archive: ArchiveKind,
}

impl DeviceProfile {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn palette(&self) -> &'static [Rgb<u8>] {
        self.palette
    }

    pub fn archive(&self) -> ArchiveKind {
        self.archive
    }

    /// Border colour used when framing pages.
    pub fn foreground(&self) -> Rgb<u8> {
        self.palette[0]
    }

    /// Canvas colour used when framing pages.
    pub fn background(&self) -> Rgb<u8> {
        self.palette[self.palette.len() - 1]
    }

    /// Look a device up by its display name.
    ///
    /// Matching ignores case and treats spaces, underscores and dashes alike.
    pub fn lookup(name: &str) -> Result<Self, Error> {
        Preset::from_str(name).map(Preset::profile)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, EnumCount, EnumIter)]
pub enum Preset {
    Kindle1,
    Kindle2,
    Kindle4,
    KindleDx,
    KindlePaperwhite1,
    KindlePaperwhite3,
    KindlePaperwhite5,
    KindleScribe,
    KoboMini,
    KoboGlo,
    KoboGloHd,
    KoboAura,
    KoboAuraHd,
    KoboAuraH2o,
    KoboLibraH2o,
    KoboLibra2,
}

impl Default for Preset {
    fn default() -> Self {
        Preset::KoboLibraH2o
    }
}

impl Preset {
    pub fn len() -> usize {
        Self::COUNT
    }

    pub fn iter() -> impl Iterator<Item = Self> {
        <Self as strum::IntoEnumIterator>::iter()
    }

    pub fn name(&self) -> &'static str {
        match self {
            Preset::Kindle1 => "Kindle 1",
            Preset::Kindle2 => "Kindle 2/3/Touch",
            Preset::Kindle4 => "Kindle 4 & 5",
            Preset::KindleDx => "Kindle DX/DXG",
            Preset::KindlePaperwhite1 => "Kindle Paperwhite 1 & 2",
            Preset::KindlePaperwhite3 => "Kindle Paperwhite 3/Voyage/Oasis",
            Preset::KindlePaperwhite5 => "Kindle Paperwhite 5",
            Preset::KindleScribe => "Kindle Scribe",
            Preset::KoboMini => "Kobo Mini/Touch",
            Preset::KoboGlo => "Kobo Glo",
            Preset::KoboGloHd => "Kobo Glo HD",
            Preset::KoboAura => "Kobo Aura",
            Preset::KoboAuraHd => "Kobo Aura HD",
            Preset::KoboAuraH2o => "Kobo Aura H2O",
            Preset::KoboLibraH2o => "Kobo Libra H2O",
            Preset::KoboLibra2 => "Kobo Libra 2",
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Preset::Kindle1 | Preset::Kindle2 | Preset::Kindle4 => (600, 800),
            Preset::KindleDx => (824, 1200),
            Preset::KindlePaperwhite1 => (758, 1024),
            Preset::KindlePaperwhite3 => (1072, 1448),
            Preset::KindlePaperwhite5 => (1236, 1648),
            Preset::KindleScribe => (1860, 2480),
            Preset::KoboMini => (600, 800),
            Preset::KoboGlo => (768, 1024),
            Preset::KoboGloHd => (1072, 1448),
            Preset::KoboAura => (758, 1024),
            Preset::KoboAuraHd => (1080, 1440),
            Preset::KoboAuraH2o => (1080, 1430),
            Preset::KoboLibraH2o | Preset::KoboLibra2 => (1264, 1680),
        }
    }

    fn palette(&self) -> &'static [Rgb<u8>] {
        match self {
            Preset::Kindle1 => PALETTE_4,
            Preset::Kindle2 | Preset::KindleDx | Preset::KoboAuraH2o => PALETTE_15A,
            Preset::KindlePaperwhite5
            | Preset::KindleScribe
            | Preset::KoboLibraH2o
            | Preset::KoboLibra2 => PALETTE_16,
            _ => PALETTE_15B,
        }
    }

    fn archive(&self) -> ArchiveKind {
        match self {
            Preset::Kindle1
            | Preset::Kindle2
            | Preset::Kindle4
            | Preset::KindleDx
            | Preset::KindlePaperwhite1
            | Preset::KindlePaperwhite3
            | Preset::KindlePaperwhite5
            | Preset::KindleScribe => ArchiveKind::Pdf,
            _ => ArchiveKind::Cbz,
        }
    }

    pub fn profile(self) -> DeviceProfile {
        let (width, height) = self.dimensions();
        DeviceProfile {
            name: self.name(),
            width,
            height,
            palette: self.palette(),
            archive: self.archive(),
        }
    }
}

fn normalize(s: &str) -> String {
    s.to_lowercase().replace([' ', '_'], "-")
}

impl TryFrom<&str> for Preset {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        let wanted = normalize(s);
        Preset::iter()
            .find(|preset| normalize(preset.name()) == wanted)
            .ok_or_else(|| Error::UnknownDevice(s.to_string()))
    }
}

impl FromStr for Preset {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from(s)
    }
}

impl From<Preset> for DeviceProfile {
    fn from(preset: Preset) -> Self {
        preset.profile()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_invariants() {
        assert_eq!(Preset::iter().count(), Preset::len());
        for preset in Preset::iter() {
            let profile = preset.profile();
            let (w, h) = profile.dimensions();
            assert!(w > 0 && h > 0, "{}", profile.name());
            assert!((4..=16).contains(&profile.palette().len()), "{}", profile.name());
        }
    }

    #[test]
    fn lookup_is_forgiving() {
        let profile = DeviceProfile::lookup("kobo_aura h2o").unwrap();
        assert_eq!(profile.dimensions(), (1080, 1430));
        assert_eq!(profile.palette().len(), 15);
        assert_eq!(profile.archive(), ArchiveKind::Cbz);

        let kindle = DeviceProfile::lookup("Kindle 4 & 5").unwrap();
        assert_eq!(kindle.archive(), ArchiveKind::Pdf);
    }

    #[test]
    fn unknown_device_is_an_error() {
        match DeviceProfile::lookup("Nook Simple Touch") {
            Err(Error::UnknownDevice(name)) => assert_eq!(name, "Nook Simple Touch"),
            other => panic!("expected UnknownDevice, got {other:?}"),
        }
    }

    #[test]
    fn frame_colours_come_from_palette_ends() {
        let profile = Preset::KoboGlo.profile();
        assert_eq!(profile.foreground(), Rgb([0, 0, 0]));
        assert_eq!(profile.background(), Rgb([255, 255, 255]));
    }
}
