use derive_try_from_primitive::TryFromPrimitive;
use std::convert::TryFrom;
use std::fmt;
use std::str::FromStr;

/// Mapping from physical position of GPIO pins on the ODROID-C2 to internal identifiers of GPIO pins in memory.
///
/// Names accepted by the memory-mapped backend are either the variant name (`Phy7`) or the internal identifier (`249`).
#[repr(u8)]
#[derive(TryFromPrimitive, Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum PinId {
    Phy7 = 249,
    Phy8 = 240,
    Phy10 = 241,
    Phy11 = 247,
    Phy12 = 238,
    Phy13 = 239,
    Phy15 = 237,
    Phy16 = 236,
    Phy18 = 233,
    Phy19 = 235,
    Phy21 = 232,
    Phy22 = 231,
    Phy23 = 230,
    Phy24 = 229,
    Phy26 = 225,
    Phy27 = 207,
    Phy28 = 208,
    Phy29 = 228,
    Phy31 = 219,
    Phy32 = 224,
    Phy33 = 234,
    Phy35 = 214,
    Phy36 = 218,
}

impl PinId {
    /// Header pins in physical order.
    pub const ALL: [PinId; 23] = [
        PinId::Phy7,
        PinId::Phy8,
        PinId::Phy10,
        PinId::Phy11,
        PinId::Phy12,
        PinId::Phy13,
        PinId::Phy15,
        PinId::Phy16,
        PinId::Phy18,
        PinId::Phy19,
        PinId::Phy21,
        PinId::Phy22,
        PinId::Phy23,
        PinId::Phy24,
        PinId::Phy26,
        PinId::Phy27,
        PinId::Phy28,
        PinId::Phy29,
        PinId::Phy31,
        PinId::Phy32,
        PinId::Phy33,
        PinId::Phy35,
        PinId::Phy36,
    ];
}

impl fmt::Display for PinId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl FromStr for PinId {
    type Err = String;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        if let Ok(raw) = name.parse::<u8>() {
            return PinId::try_from(raw).map_err(|_| name.to_string());
        }

        PinId::ALL
            .iter()
            .copied()
            .find(|pin| pin.to_string().eq_ignore_ascii_case(name))
            .ok_or_else(|| name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_header_names_and_line_ids() {
        assert_eq!("Phy7".parse::<PinId>(), Ok(PinId::Phy7));
        assert_eq!("phy36".parse::<PinId>(), Ok(PinId::Phy36));
        assert_eq!("247".parse::<PinId>(), Ok(PinId::Phy11));
        assert!("Phy9".parse::<PinId>().is_err());
        assert!("250".parse::<PinId>().is_err());
    }
}
