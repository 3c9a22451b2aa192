//! ASCII control codes NUL..US.

pub const SOH: u8 = 0x01;
pub const STX: u8 = 0x02;
pub const ETX: u8 = 0x03;
pub const EOT: u8 = 0x04;
pub const ACK: u8 = 0x06;
pub const NAK: u8 = 0x15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ControlCode {
    Nul = 0x00,
    Soh = 0x01,
    Stx = 0x02,
    Etx = 0x03,
    Eot = 0x04,
    Enq = 0x05,
    Ack = 0x06,
    Bel = 0x07,
    Bs = 0x08,
    Ht = 0x09,
    Lf = 0x0A,
    Vt = 0x0B,
    Ff = 0x0C,
    Cr = 0x0D,
    So = 0x0E,
    Si = 0x0F,
    Dle = 0x10,
    Dc1 = 0x11,
    Dc2 = 0x12,
    Dc3 = 0x13,
    Dc4 = 0x14,
    Nak = 0x15,
    Syn = 0x16,
    Etb = 0x17,
    Can = 0x18,
    Em = 0x19,
    Sub = 0x1A,
    Esc = 0x1B,
    Fs = 0x1C,
    Gs = 0x1D,
    Rs = 0x1E,
    Us = 0x1F,
}

use ControlCode::*;

const ALL: [ControlCode; 32] = [
    Nul, Soh, Stx, Etx, Eot, Enq, Ack, Bel, Bs, Ht, Lf, Vt, Ff, Cr, So, Si, Dle, Dc1, Dc2, Dc3,
    Dc4, Nak, Syn, Etb, Can, Em, Sub, Esc, Fs, Gs, Rs, Us,
];

impl ControlCode {
    pub fn all() -> &'static [ControlCode] {
        &ALL
    }

    pub fn value(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        ALL.get(value as usize).copied()
    }

    /// Conventional mnemonic, e.g. `"STX"`.
    pub fn name(self) -> &'static str {
        match self {
            Nul => "NUL",
            Soh => "SOH",
            Stx => "STX",
            Etx => "ETX",
            Eot => "EOT",
            Enq => "ENQ",
            Ack => "ACK",
            Bel => "BEL",
            Bs => "BS",
            Ht => "HT",
            Lf => "LF",
            Vt => "VT",
            Ff => "FF",
            Cr => "CR",
            So => "SO",
            Si => "SI",
            Dle => "DLE",
            Dc1 => "DC1",
            Dc2 => "DC2",
            Dc3 => "DC3",
            Dc4 => "DC4",
            Nak => "NAK",
            Syn => "SYN",
            Etb => "ETB",
            Can => "CAN",
            Em => "EM",
            Sub => "SUB",
            Esc => "ESC",
            Fs => "FS",
            Gs => "GS",
            Rs => "RS",
            Us => "US",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Nul => "Null",
            Soh => "Start of Header",
            Stx => "Start of Text",
            Etx => "End of Text",
            Eot => "End of Transmission",
            Enq => "Enquiry",
            Ack => "Acknowledge",
            Bel => "Bell",
            Bs => "Backspace",
            Ht => "Horizontal Tab",
            Lf => "Line Feed",
            Vt => "Vertical Tab",
            Ff => "Form Feed",
            Cr => "Carriage Return",
            So => "Shift Out",
            Si => "Shift In",
            Dle => "Data Link Escape",
            Dc1 => "Device Control 1",
            Dc2 => "Device Control 2",
            Dc3 => "Device Control 3",
            Dc4 => "Device Control 4",
            Nak => "Negative Acknowledge",
            Syn => "Synchronize",
            Etb => "End of Transmission Block",
            Can => "Cancel",
            Em => "End of Medium",
            Sub => "Substitute",
            Esc => "Escape",
            Fs => "File Separator",
            Gs => "Group Separator",
            Rs => "Record Separator",
            Us => "Unit Separator",
        }
    }

    /// Case-insensitive lookup by mnemonic.
    pub fn from_name(name: &str) -> Option<Self> {
        ALL.iter()
            .copied()
            .find(|code| code.name().eq_ignore_ascii_case(name))
    }
}

/// Mnemonic of a control byte, `None` outside 0x00..=0x1F.
pub fn code_name(value: u8) -> Option<&'static str> {
    ControlCode::from_u8(value).map(ControlCode::name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_values_match_table_position() {
        for (i, code) in ControlCode::all().iter().enumerate() {
            assert_eq!(code.value() as usize, i);
            assert_eq!(ControlCode::from_u8(i as u8), Some(*code));
        }
        assert_eq!(ControlCode::from_u8(0x20), None);
    }

    #[test]
    fn test_protocol_bytes() {
        assert_eq!(ControlCode::Soh.value(), SOH);
        assert_eq!(ControlCode::Stx.value(), STX);
        assert_eq!(ControlCode::Etx.value(), ETX);
        assert_eq!(ControlCode::Eot.value(), EOT);
        assert_eq!(ControlCode::Ack.value(), ACK);
        assert_eq!(ControlCode::Nak.value(), NAK);
    }

    #[test]
    fn test_name_lookup() {
        assert_eq!(code_name(0x02), Some("STX"));
        assert_eq!(code_name(0x15), Some("NAK"));
        assert_eq!(code_name(0x7f), None);
        assert_eq!(ControlCode::from_name("eot"), Some(ControlCode::Eot));
        assert_eq!(ControlCode::from_name("DC4"), Some(ControlCode::Dc4));
        assert_eq!(ControlCode::from_name("XYZ"), None);
    }
}
