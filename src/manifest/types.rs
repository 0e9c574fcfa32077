use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

/// Declares an enum whose variants map one-to-one onto the strings the
/// flashing tool accepts on its command line.
macro_rules! tool_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident { $($variant:ident => $text:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
        #[serde(try_from = "String")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                $name::ALL
                    .iter()
                    .copied()
                    .find(|v| v.as_str().eq_ignore_ascii_case(s))
                    .ok_or_else(|| format!("unknown {} '{}'", stringify!($name), s))
            }
        }

        impl TryFrom<String> for $name {
            type Error = String;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                s.parse()
            }
        }
    };
}

tool_enum! {
    /// Supported ESP chip families.
    pub enum ChipFamily {
        Esp32 => "esp32",
        Esp32S2 => "esp32-s2",
        Esp32S3 => "esp32-s3",
        Esp32C3 => "esp32-c3",
        Esp32C6 => "esp32-c6",
        Esp32H2 => "esp32-h2",
        Esp8266 => "esp8266",
    }
}

tool_enum! {
    /// SPI flash access mode.
    pub enum FlashMode {
        Qio => "qio",
        Qout => "qout",
        Dio => "dio",
        Dout => "dout",
    }
}

tool_enum! {
    /// SPI flash clock frequency.
    pub enum FlashFreq {
        F20m => "20m",
        F26m => "26m",
        F40m => "40m",
        F80m => "80m",
    }
}

tool_enum! {
    /// Flash chip size, or one of the tool's `detect`/`keep` directives.
    #[allow(non_camel_case_types)]
    pub enum FlashSize {
        _1Mb => "1MB",
        _2Mb => "2MB",
        _4Mb => "4MB",
        _8Mb => "8MB",
        _16Mb => "16MB",
        _32Mb => "32MB",
        _64Mb => "64MB",
        _128Mb => "128MB",
        Detect => "detect",
        Keep => "keep",
    }
}

impl ChipFamily {
    /// Name used by `esptool --chip`.
    pub fn esptool_name(&self) -> &'static str {
        match self {
            ChipFamily::Esp32 => "esp32",
            ChipFamily::Esp32S2 => "esp32s2",
            ChipFamily::Esp32S3 => "esp32s3",
            ChipFamily::Esp32C3 => "esp32c3",
            ChipFamily::Esp32C6 => "esp32c6",
            ChipFamily::Esp32H2 => "esp32h2",
            ChipFamily::Esp8266 => "esp8266",
        }
    }

    /// Derives the family from a chip description reported by the ROM
    /// loader, e.g. `ESP32-D0WD-V3 (revision v3.1)` or `ESP32-S3 (QFN56)`.
    pub fn from_chip_name(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_uppercase();
        // Suffixed variants first, plain ESP32 is a prefix of all of them.
        const PREFIXES: &[(&str, ChipFamily)] = &[
            ("ESP32-S2", ChipFamily::Esp32S2),
            ("ESP32-S3", ChipFamily::Esp32S3),
            ("ESP32-C3", ChipFamily::Esp32C3),
            ("ESP32-C6", ChipFamily::Esp32C6),
            ("ESP32-H2", ChipFamily::Esp32H2),
            ("ESP8266", ChipFamily::Esp8266),
            ("ESP32", ChipFamily::Esp32),
        ];
        PREFIXES
            .iter()
            .find(|(prefix, _)| name.starts_with(prefix))
            .map(|&(_, family)| family)
    }
}

/// A single binary part to flash at a specific offset.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FlashPart {
    /// Human-readable label, e.g. "Bootloader" or "Firmware".
    pub label: String,
    /// Flash offset in bytes.
    pub offset: u32,
    /// Location of the .bin file, absolute or relative to the site root.
    pub url: String,
    /// Expected CRC32 of the payload, checked after download when present.
    #[serde(default)]
    pub crc32: Option<u32>,
}

impl FlashPart {
    pub fn new(label: impl Into<String>, offset: u32, url: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            offset,
            url: url.into(),
            crc32: None,
        }
    }

    pub fn with_crc32(mut self, crc: u32) -> Self {
        self.crc32 = Some(crc);
        self
    }
}

/// Flash configuration of one device variant.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BoardProfile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub chip_family: ChipFamily,
    pub baud_rate: u32,
    pub flash_mode: FlashMode,
    pub flash_freq: FlashFreq,
    pub flash_size: FlashSize,
    /// Erase the entire flash before writing.
    #[serde(default)]
    pub erase_all: bool,
    /// Parts in the order they are written.
    pub parts: Vec<FlashPart>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_strings_round_trip() {
        assert_eq!("esp32-s3".parse::<ChipFamily>(), Ok(ChipFamily::Esp32S3));
        assert_eq!("DIO".parse::<FlashMode>(), Ok(FlashMode::Dio));
        assert_eq!(FlashFreq::F40m.to_string(), "40m");
        assert_eq!("4MB".parse::<FlashSize>(), Ok(FlashSize::_4Mb));
        assert!("5MB".parse::<FlashSize>().is_err());
    }

    #[test]
    fn chip_family_from_detected_name() {
        assert_eq!(
            ChipFamily::from_chip_name("ESP32-D0WD-V3 (revision v3.1)"),
            Some(ChipFamily::Esp32)
        );
        assert_eq!(
            ChipFamily::from_chip_name("ESP32-S3 (QFN56) (revision v0.2)"),
            Some(ChipFamily::Esp32S3)
        );
        assert_eq!(
            ChipFamily::from_chip_name("esp32-c3 (QFN32)"),
            Some(ChipFamily::Esp32C3)
        );
        assert_eq!(ChipFamily::from_chip_name("ESP8266EX"), Some(ChipFamily::Esp8266));
        assert_eq!(ChipFamily::from_chip_name("RP2040"), None);
    }

    #[test]
    fn esptool_names_drop_the_dash() {
        assert_eq!(ChipFamily::Esp32S2.esptool_name(), "esp32s2");
        assert_eq!(ChipFamily::Esp32.esptool_name(), "esp32");
    }
}
